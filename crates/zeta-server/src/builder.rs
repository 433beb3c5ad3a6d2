use std::path::Path;

use tempfile::TempDir;
use uuid::Uuid;

use zeta_common::ZetaError;
use zeta_engine::ContainerEngine;

pub fn runner_image_tag(zeta_name: &str) -> String {
    format!("{zeta_name}-runner-image-{}", Uuid::new_v4())
}

fn write_build_context(
    dir: &Path,
    base_image: &str,
    handler_source: &str,
) -> std::io::Result<()> {
    std::fs::write(dir.join("function.py"), handler_source)?;
    let dockerfile = format!(
        "FROM {base_image}\nWORKDIR /zeta\nCOPY function.py /zeta/handler/handler.py\n"
    );
    std::fs::write(dir.join("Dockerfile"), dockerfile)
}

/// Build a per-function runner image around the uploaded handler source.
///
/// The build context is a scoped temporary directory holding the handler
/// verbatim plus the generated recipe; it is released on every exit path.
/// Returns `(image_id, tag)`. Metadata is untouched here, the orchestrator
/// links the image to its function.
pub async fn build_runner_image(
    engine: &dyn ContainerEngine,
    base_image: &str,
    zeta_name: &str,
    handler_source: &str,
) -> Result<(String, String), ZetaError> {
    let context = TempDir::new()
        .map_err(|e| ZetaError::BuildFailed(format!("failed to create build context: {e}")))?;
    write_build_context(context.path(), base_image, handler_source)
        .map_err(|e| ZetaError::BuildFailed(format!("failed to write build context: {e}")))?;

    let tag = runner_image_tag(zeta_name);
    tracing::info!(zeta = %zeta_name, %tag, "building runner image");
    let image_id = engine.build_image(&tag, context.path()).await?;
    Ok((image_id, tag))
}
