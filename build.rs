use std::process::Command;

fn main() {
    // CI passes these through so release binaries report the pipeline's values
    let built_at = std::env::var("BUILD_DATETIME")
        .unwrap_or_else(|_| chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());
    let commit = std::env::var("BUILD_GIT_HASH")
        .ok()
        .or_else(source_commit)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=BUILD_DATETIME={built_at}");
    println!("cargo:rustc-env=BUILD_GIT_HASH={commit}");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=BUILD_DATETIME");
    println!("cargo:rerun-if-env-changed=BUILD_GIT_HASH");
}

/// Short commit of the checkout, marked `-dirty` when the tree has local changes
fn source_commit() -> Option<String> {
    // Command-line git keeps the build free of libgit2/OpenSSL
    let head = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())?;
    let commit = String::from_utf8(head.stdout).ok()?.trim().to_string();

    let dirty = Command::new("git")
        .args(["status", "--porcelain", "--untracked-files=no"])
        .output()
        .is_ok_and(|out| out.status.success() && !out.stdout.is_empty());

    Some(if dirty { format!("{commit}-dirty") } else { commit })
}
