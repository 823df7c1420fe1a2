//! Whether output goes to a person or a log

use std::io::IsTerminal;

/// Set by common CI systems
const CI_VARS: [&str; 9] = [
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "BUILDKITE",
    "TEAMCITY_VERSION",
    "TF_BUILD",
];

/// Output mode for the CLI
#[derive(Debug, Clone)]
pub struct UiContext {
    fancy: bool,
}

impl UiContext {
    /// Spinners and symbols only when both streams are terminals outside CI
    pub fn detect() -> Self {
        let terminal = std::io::stdout().is_terminal() && std::io::stderr().is_terminal();
        let dumb = std::env::var("TERM").is_ok_and(|t| t == "dumb");
        let ci = CI_VARS.iter().any(|var| std::env::var_os(var).is_some());
        Self {
            fancy: terminal && !dumb && !ci,
        }
    }

    /// Plain `[OK]`/`[WARN]` output
    pub fn non_interactive() -> Self {
        Self { fancy: false }
    }

    pub fn use_fancy_output(&self) -> bool {
        self.fancy
    }
}
