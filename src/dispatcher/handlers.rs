//! Operation handlers, one per category

use tracing::{debug, instrument};

use super::conformance::ConformanceRequest;
use super::{AdapterContext, OperationRequest, OperationUnit};
use crate::cluster::ChartAction;
use crate::events::Status;
use crate::registry::{Operation, OperationCategory, SERVICE_NAME};
use crate::{Error, CONFORMANCE_NAMESPACE};

/// Run `operation` to completion, finishing `unit` exactly once
pub(crate) async fn execute(
    ctx: &AdapterContext,
    operation: &Operation,
    request: &OperationRequest,
    unit: OperationUnit,
) {
    match operation.category {
        OperationCategory::Install | OperationCategory::Uninstall => {
            install_mesh(ctx, operation, request, unit).await
        }
        OperationCategory::SampleApp => sample_app(ctx, operation, request, unit).await,
        OperationCategory::Custom => custom_manifest(ctx, request, unit).await,
        OperationCategory::ConformanceTest => conformance(ctx, request, unit).await,
    }
}

fn finish(unit: OperationUnit, subject: &str, delete: bool, result: Result<String, Error>) {
    match result {
        Ok(details) => unit.succeed(subject, Status::finished(delete), details),
        Err(e) => unit.fail(
            format!("Error while {} {subject}", Status::in_progress(delete)),
            &e,
        ),
    }
}

#[instrument(skip_all, fields(operation_id = %unit.id(), delete = request.delete))]
async fn install_mesh(
    ctx: &AdapterContext,
    operation: &Operation,
    request: &OperationRequest,
    unit: OperationUnit,
) {
    let delete = request.delete || operation.category == OperationCategory::Uninstall;
    let subject = format!("{} service mesh", ctx.profile.name);
    let version = request
        .version
        .clone()
        .or_else(|| operation.latest_version().map(str::to_string))
        .unwrap_or_default();
    let namespace = ctx.profile.control_plane_namespace(&request.namespace);

    unit.progress(
        &subject,
        Status::in_progress(delete),
        format!("version {version} in namespace {namespace}"),
    );
    let result = ctx
        .cluster
        .apply_chart(
            &ctx.profile.chart(&version),
            namespace,
            ChartAction::from_delete(delete),
            true,
        )
        .await
        .map(|()| format!("{subject} {version} in namespace {namespace}"));
    finish(unit, &subject, delete, result);
}

#[instrument(skip_all, fields(operation_id = %unit.id(), operation = %operation.name, delete = request.delete))]
async fn sample_app(
    ctx: &AdapterContext,
    operation: &Operation,
    request: &OperationRequest,
    unit: OperationUnit,
) {
    let subject = operation
        .properties
        .get(SERVICE_NAME)
        .map(|s| format!("{s} application"))
        .unwrap_or_else(|| operation.description.clone());

    unit.progress(&subject, Status::in_progress(request.delete), "");
    let result = deploy_sample_app(ctx, operation, request).await;
    finish(unit, &subject, request.delete, result);
}

async fn deploy_sample_app(
    ctx: &AdapterContext,
    operation: &Operation,
    request: &OperationRequest,
) -> Result<String, Error> {
    for namespace in &operation.namespaces {
        enroll_namespace(ctx, namespace, request.delete)
            .await
            .map_err(|e| match e {
                e @ Error::ApplyFailed { .. } => e,
                other => Error::apply_in(namespace, other.to_string()),
            })?;
    }

    // Multi-namespace apps carry their namespaces in the templates
    let target = if operation.namespaces.is_empty() {
        request.namespace.as_str()
    } else {
        ""
    };
    // Same order on install and uninstall
    for template in &operation.templates {
        debug!(template = %template, "applying sample app template");
        let body = ctx.source.fetch(template).await?;
        ctx.cluster
            .apply_manifest(&body, target, request.delete)
            .await?;
    }
    Ok(format!("{} templates", operation.templates.len()))
}

async fn enroll_namespace(ctx: &AdapterContext, namespace: &str, delete: bool) -> Result<(), Error> {
    if !delete {
        ctx.cluster.ensure_namespace(namespace).await?;
    }
    ctx.cluster
        .set_mesh_membership(namespace, &ctx.profile.membership, !delete)
        .await
}

#[instrument(skip_all, fields(operation_id = %unit.id(), delete = request.delete))]
async fn custom_manifest(ctx: &AdapterContext, request: &OperationRequest, unit: OperationUnit) {
    let subject = "Manifest";
    let (running, done) = if request.delete {
        (Status::Removing, Status::Removed)
    } else {
        (Status::Deploying, Status::Deployed)
    };
    unit.progress(subject, running, "");

    let body = request.custom_body.as_deref().unwrap_or_default();
    let result = if body.trim().is_empty() {
        Err(Error::apply("custom operation requires a manifest body"))
    } else {
        ctx.cluster
            .apply_manifest(body, &request.namespace, request.delete)
            .await
    };
    match result {
        Ok(()) => unit.succeed(subject, done, ""),
        Err(e) => unit.fail(format!("Error while {running} manifest"), &e),
    }
}

#[instrument(skip_all, fields(operation_id = %unit.id()))]
async fn conformance(ctx: &AdapterContext, request: &OperationRequest, unit: OperationUnit) {
    let subject = "Conformance test";
    let suite = ConformanceRequest {
        manifest: ctx.config.conformance_manifest.clone(),
        mesh: ctx.profile.name.clone(),
        mesh_version: request.version.clone().unwrap_or_default(),
        namespace: CONFORMANCE_NAMESPACE.to_string(),
    };
    unit.progress(subject, Status::Running, suite.manifest.clone());

    match ctx.conformance.run(&suite).await {
        Ok(report) => unit.succeed(subject, Status::Completed, report),
        Err(e) => unit.fail("Conformance test failed", &e),
    }
}
