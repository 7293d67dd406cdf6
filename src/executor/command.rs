//! Container invocation assembly.
//!
//! The host side is a tokenized `docker` argv; nothing user-supplied is
//! ever interpolated into a host shell. User commands are joined into a
//! single script handed to `/bin/sh -c` inside the container, which is
//! the isolation boundary they are meant to run behind.

use std::path::Path;

use crate::job::{JobSpec, Submission};
use crate::queue::JobId;
use crate::runtime::RuntimeProfile;

/// A fully assembled container invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCommand {
    pub container_name: String,
    /// Arguments to the `docker` binary, starting with `run`.
    pub args: Vec<String>,
}

pub fn container_name(prefix: &str, job_id: JobId) -> String {
    format!("{prefix}-{job_id}")
}

/// Single-quote a value for the in-container shell script.
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn resolved_build_cmd(spec: &JobSpec, profile: &RuntimeProfile) -> String {
    spec.build_cmd
        .as_deref()
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
        .unwrap_or(profile.default_build_cmd)
        .to_string()
}

fn install_step(spec: &JobSpec, profile: &RuntimeProfile) -> Option<String> {
    if spec.dependencies.is_empty() {
        return None;
    }
    let template = profile.install_template?;
    if template.contains("{deps}") {
        Some(template.replace("{deps}", &spec.dependencies.join(" ")))
    } else {
        Some(template.to_string())
    }
}

/// Build the script run by `/bin/sh -c` inside the container. Empty for
/// custom images without an explicit build command, which then run their
/// entrypoint instead.
pub fn build_script(spec: &JobSpec, profile: &RuntimeProfile) -> String {
    let mut steps: Vec<String> = Vec::new();
    match &spec.submission {
        Submission::GitRepo { git_link } => {
            steps.push(format!("git clone {} .", sh_quote(git_link)));
            if let Some(dir) = spec.start_directory.as_deref().map(str::trim) {
                if !dir.is_empty() {
                    steps.push(format!("cd {}", sh_quote(dir)));
                }
            }
            if let Some(install) = install_step(spec, profile) {
                steps.push(install);
            }
            steps.extend(spec.initial_cmds.iter().cloned());
            steps.push(resolved_build_cmd(spec, profile));
        }
        Submission::RawCode { .. } => {
            if let Some(install) = install_step(spec, profile) {
                steps.push(install);
            }
            steps.extend(spec.initial_cmds.iter().cloned());
            steps.push(resolved_build_cmd(spec, profile));
        }
        Submission::CustomImage { .. } => {
            if let Some(cmd) = spec.build_cmd.as_deref().map(str::trim) {
                if !cmd.is_empty() {
                    steps.push(cmd.to_string());
                }
            }
        }
    }
    steps.join(" && ")
}

/// Assemble the full `docker run` argv for one job.
pub fn build_command(
    job_id: JobId,
    spec: &JobSpec,
    profile: &RuntimeProfile,
    workspace: &Path,
    prefix: &str,
) -> ContainerCommand {
    let name = container_name(prefix, job_id);
    let image = match &spec.submission {
        Submission::CustomImage { docker_image } => docker_image.clone(),
        _ => profile.image.to_string(),
    };

    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.clone(),
        format!("--memory={}", spec.memory_limit.docker_arg()),
        "--workdir=/app".to_string(),
        "-v".to_string(),
        format!("{}:/app", workspace.display()),
    ];
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(image);

    let script = build_script(spec, profile);
    if !script.is_empty() {
        args.push("/bin/sh".to_string());
        args.push("-c".to_string());
        args.push(script);
    }

    ContainerCommand {
        container_name: name,
        args,
    }
}
