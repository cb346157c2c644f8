//! Argument validation for the `run` command.

use std::path::PathBuf;

use axislink_core::Axis;

/// A funscript bound to the axis it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBinding {
    pub axis: Axis,
    pub path: PathBuf,
}

/// Parse `AXIS=PATH`, e.g. `L0=clip.funscript`.
pub fn parse_script_binding(value: &str) -> Result<ScriptBinding, String> {
    let (axis, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected AXIS=PATH, got \"{}\"", value))?;

    let axis = axis
        .trim()
        .to_ascii_uppercase()
        .parse::<Axis>()
        .map_err(|_| format!("unknown axis \"{}\"", axis.trim()))?;

    let path = path.trim();
    if path.is_empty() {
        return Err(format!("missing script path for {}", axis));
    }

    Ok(ScriptBinding {
        axis,
        path: PathBuf::from(path),
    })
}

/// First axis bound to more than one script, if any.
pub fn find_duplicate_axis(bindings: &[ScriptBinding]) -> Option<Axis> {
    bindings.iter().enumerate().find_map(|(i, binding)| {
        bindings[..i]
            .iter()
            .any(|earlier| earlier.axis == binding.axis)
            .then_some(binding.axis)
    })
}
