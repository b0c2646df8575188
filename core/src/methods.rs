// Method Registry - maps sanitization levels to concrete command plans
//
// Pass counts follow NIST 800-88 as applied by the tool:
// - Clear:   1 pass  (zero fill)
// - Purge:   3 passes (random overwrite + final zero)
// - Destroy: 7 passes (random overwrite, then zero fill)
//
// Commands are built as argument vectors and never go through a shell, but the
// device path is still held to a strict grammar before it is interpolated.

use crate::{WipeError, WipeMethod, WipeResult};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder substituted with the device path in step arguments
pub const DEVICE_PLACEHOLDER: &str = "{device}";

lazy_static! {
    static ref UNIX_DEVICE_PATH: Regex =
        Regex::new(r"^(/[A-Za-z0-9_.\-]+)+$").expect("static regex");
    static ref WINDOWS_PHYSICAL_DRIVE: Regex =
        Regex::new(r"^\\\\\.\\PhysicalDrive[0-9]+$").expect("static regex");
}

/// Reject device paths outside the expected grammar.
///
/// Accepts absolute paths made of `[A-Za-z0-9_.-]` segments (no `.`/`..`
/// segments) and `\\.\PhysicalDriveN`.
pub fn validate_device_path(path: &str) -> WipeResult<()> {
    if WINDOWS_PHYSICAL_DRIVE.is_match(path) {
        return Ok(());
    }

    let traverses = path.split('/').any(|segment| segment == ".." || segment == ".");
    if UNIX_DEVICE_PATH.is_match(path) && !traverses {
        Ok(())
    } else {
        Err(WipeError::InvalidDevicePath(path.to_string()))
    }
}

/// One command of a plan, with `{device}` placeholders in its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl StepTemplate {
    pub fn new<S: Into<String>>(program: impl Into<String>, args: Vec<S>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn render(&self, device_path: &str) -> CommandStep {
        CommandStep {
            program: self.program.clone(),
            args: self
                .args
                .iter()
                .map(|arg| arg.replace(DEVICE_PLACEHOLDER, device_path))
                .collect(),
        }
    }
}

/// Operator-supplied command templates, one step list per method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomToolset {
    pub clear: Vec<StepTemplate>,
    pub purge: Vec<StepTemplate>,
    pub destroy: Vec<StepTemplate>,
}

/// How a host turns a method into commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Toolset {
    /// GNU coreutils `dd` and `shred`
    Coreutils,
    /// macOS `diskutil secureErase`
    Diskutil,
    Custom(CustomToolset),
}

/// Rough wall-clock expectation, for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationClass {
    Short,
    Long,
    Extended,
}

impl fmt::Display for DurationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DurationClass::Short => "short (single pass)",
            DurationClass::Long => "long (multi-pass)",
            DurationClass::Extended => "extended (7+ passes)",
        };
        f.write_str(label)
    }
}

/// Concrete plan for one method on one toolset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodPlan {
    pub method: WipeMethod,
    pub pass_count: u32,
    pub nist_level: String,
    pub toolchain: Vec<String>,
    pub duration_class: DurationClass,
    pub steps: Vec<StepTemplate>,
}

impl MethodPlan {
    /// Build the invocable command for `device_path`
    pub fn command_for(&self, device_path: &str) -> WipeResult<WipeCommand> {
        validate_device_path(device_path)?;

        if self.steps.is_empty() {
            return Err(WipeError::Config(format!(
                "no command steps configured for {}",
                self.method
            )));
        }

        Ok(WipeCommand {
            steps: self.steps.iter().map(|s| s.render(device_path)).collect(),
        })
    }
}

/// A rendered step: program plus literal arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for CommandStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Commands for one session, run in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WipeCommand {
    pub steps: Vec<CommandStep>,
}

impl fmt::Display for WipeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" && ")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

pub struct MethodRegistry {
    toolset: Toolset,
}

impl MethodRegistry {
    pub fn new(toolset: Toolset) -> Self {
        Self { toolset }
    }

    pub fn toolset(&self) -> &Toolset {
        &self.toolset
    }

    /// NIST minimum pass count for a method
    pub fn pass_count(method: WipeMethod) -> u32 {
        match method {
            WipeMethod::Clear => 1,
            WipeMethod::Purge => 3,
            WipeMethod::Destroy => 7,
        }
    }

    /// Plan for `method`; total over every method
    pub fn resolve(&self, method: WipeMethod) -> MethodPlan {
        let steps = match &self.toolset {
            Toolset::Coreutils => coreutils_steps(method),
            Toolset::Diskutil => diskutil_steps(method),
            Toolset::Custom(custom) => match method {
                WipeMethod::Clear => custom.clear.clone(),
                WipeMethod::Purge => custom.purge.clone(),
                WipeMethod::Destroy => custom.destroy.clone(),
            },
        };

        let mut toolchain: Vec<String> = Vec::new();
        for step in &steps {
            if !toolchain.contains(&step.program) {
                toolchain.push(step.program.clone());
            }
        }

        let (nist_level, duration_class) = match method {
            WipeMethod::Clear => ("NIST 800-88 Clear", DurationClass::Short),
            WipeMethod::Purge => ("NIST 800-88 Purge", DurationClass::Long),
            WipeMethod::Destroy => ("NIST 800-88 Destroy", DurationClass::Extended),
        };

        MethodPlan {
            method,
            pass_count: Self::pass_count(method),
            nist_level: nist_level.to_string(),
            toolchain,
            duration_class,
            steps,
        }
    }
}

fn zero_fill_step() -> StepTemplate {
    StepTemplate::new(
        "dd",
        vec![
            "if=/dev/zero",
            "of={device}",
            "bs=1M",
            "status=progress",
            "conv=fsync",
        ],
    )
}

fn coreutils_steps(method: WipeMethod) -> Vec<StepTemplate> {
    match method {
        WipeMethod::Clear => vec![zero_fill_step()],
        WipeMethod::Purge => vec![StepTemplate::new(
            "shred",
            vec!["-v", "-n", "3", "-z", DEVICE_PLACEHOLDER],
        )],
        WipeMethod::Destroy => vec![
            StepTemplate::new("shred", vec!["-v", "-n", "7", DEVICE_PLACEHOLDER]),
            zero_fill_step(),
        ],
    }
}

fn diskutil_steps(method: WipeMethod) -> Vec<StepTemplate> {
    // secureErase levels: 0 single zero pass, 4 DoE 3-pass, 2 Gutmann-lite 7-pass
    let level = match method {
        WipeMethod::Clear => "0",
        WipeMethod::Purge => "4",
        WipeMethod::Destroy => "2",
    };
    vec![StepTemplate::new(
        "diskutil",
        vec!["secureErase", level, DEVICE_PLACEHOLDER],
    )]
}
