use std::path::Path;

pub const FEAT_COMMAND: &str = "feat";

/// `feat <design.fsf>`
pub fn build_feat_command(design: &Path) -> Vec<String> {
    vec![FEAT_COMMAND.to_string(), design.display().to_string()]
}
