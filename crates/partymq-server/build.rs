use vergen_gitcl::{BuildBuilder, CargoBuilder, Emitter, GitclBuilder, RustcBuilder};

/// Git variables and their values when neither git nor the environment has them
const GIT_FALLBACKS: [(&str, &str); 4] = [
    ("VERGEN_GIT_SHA", "unknown"),
    ("VERGEN_GIT_BRANCH", "unknown"),
    ("VERGEN_GIT_COMMIT_TIMESTAMP", "unknown"),
    ("VERGEN_GIT_DIRTY", "false"),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let build = BuildBuilder::all_build()?;
    let cargo = CargoBuilder::all_cargo()?;
    let rustc = RustcBuilder::all_rustc()?;

    let mut emitter = Emitter::default();
    emitter
        .add_instructions(&build)?
        .add_instructions(&cargo)?
        .add_instructions(&rustc)?;

    let git_added = match GitclBuilder::all_git() {
        Ok(git) => emitter.add_instructions(&git).is_ok(),
        Err(_) => false,
    };

    // Container builds pass git metadata as build args
    if !git_added {
        for (name, default) in GIT_FALLBACKS {
            let value = std::env::var(name).unwrap_or_else(|_| default.to_string());
            println!("cargo::rustc-env={name}={value}");
        }
    }

    emitter.emit()?;
    Ok(())
}
