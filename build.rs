fn main() {
    set_git_revision_hash();
}

/// Expose the short git hash to the CLI as `BROWSER_RANKER_BUILD_GIT_HASH`,
/// or "unknown" outside a git checkout.
fn set_git_revision_hash() {
    use std::process::Command;

    let args = &["rev-parse", "--short=10", "HEAD"];
    let rev = Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|rev| !rev.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=BROWSER_RANKER_BUILD_GIT_HASH={}", rev);
}
