//! Shared test infrastructure for integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Scratch directory plus helpers for driving the `hcp-feat` binary.
pub struct TestFixture {
    pub temp: TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent directory");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Write a gear `config.json` with the required inputs and the given
    /// `config` and `destination` objects.
    #[allow(dead_code)]
    pub fn write_gear_config(
        &self,
        config: serde_json::Value,
        destination: serde_json::Value,
    ) -> PathBuf {
        let input = |name: &str| {
            serde_json::json!({
                "base": "file",
                "location": { "path": self.path(&format!("input/{name}")), "name": name }
            })
        };
        let value = serde_json::json!({
            "config": config,
            "inputs": {
                "functional_zip": input("func.zip"),
                "structural_zip": input("struct.zip"),
                "FSF_TEMPLATE": input("design.fsf"),
            },
            "destination": destination,
        });
        let bytes = serde_json::to_vec_pretty(&value).expect("serialize config");
        self.write("config.json", &bytes)
    }

    /// Run the binary with `args`, without inheriting `RUST_LOG`.
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_hcp-feat"))
            .args(args)
            .current_dir(self.root())
            .env_remove("RUST_LOG")
            .output()
            .expect("run hcp-feat")
    }
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
