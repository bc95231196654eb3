use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
    println!("cargo:rerun-if-env-changed=CAPSIFT_BUILD_COMMIT");

    let commit = env::var("CAPSIFT_BUILD_COMMIT")
        .ok()
        .or_else(|| env::var("GITHUB_SHA").ok())
        .filter(|v| !v.is_empty())
        .or_else(|| run_git(&["rev-parse", "HEAD"]))
        .map(|full| short_commit(&full))
        .unwrap_or_else(|| "unknown".to_string());
    let date = run_git(&["log", "-1", "--format=%cs"]).unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=CAPSIFT_BUILD_COMMIT={commit}");
    println!("cargo:rustc-env=CAPSIFT_BUILD_DATE={date}");
}

fn run_git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() { None } else { Some(value) }
}

fn short_commit(full: &str) -> String {
    full.chars().take(7).collect()
}
