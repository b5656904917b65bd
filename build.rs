use std::process::Command;

/// Trimmed stdout of `program args`, or `"unknown"` when it is missing or
/// fails.
fn command_output(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".into())
}

fn main() {
    // Both values end up in the startup log line.
    let built_at = command_output("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]);
    let git_sha = command_output("git", &["rev-parse", "--short", "HEAD"]);

    println!("cargo:rustc-env=BUILD_TIMESTAMP={built_at}");
    println!("cargo:rustc-env=BUILD_GIT_SHA={git_sha}");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
