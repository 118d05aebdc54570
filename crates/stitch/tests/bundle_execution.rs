//! Bundles executed under Node.js
//!
//! Each test writes a small project, bundles it, writes the artifacts to disk
//! and runs the entry artifact with `node`. Tests pass without running
//! anything when `node` is not installed.

use std::{fs, process::Command};

use pretty_assertions::assert_eq;
use stitch::{
    config::{Config, SplitPolicy},
    orchestrator::Bundler,
};
use tempfile::TempDir;

fn node_available() -> bool {
    Command::new("node")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

/// Bundle `files` from `entry`, run the result and return its stdout
///
/// `None` when `node` is not installed.
fn run_bundle(
    files: &[(&str, &str)],
    entry: &str,
    configure: impl FnOnce(&mut Config),
) -> anyhow::Result<Option<String>> {
    if !node_available() {
        return Ok(None);
    }

    let temp_dir = TempDir::new()?;
    let root = temp_dir.path().join("project");
    fs::create_dir_all(&root)?;
    let root = root.canonicalize()?;
    for (name, content) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }

    let mut config = Config {
        root: root.clone(),
        ..Config::default()
    };
    configure(&mut config);
    let entry_name = config.entry_name.clone();
    let bundler = Bundler::new(config);
    let entry = bundler.get_resolved_entry(entry)?;
    let manifest = bundler.bundle_manifest(&entry)?;

    let dist = temp_dir.path().join("dist");
    for (name, file) in &manifest.files {
        let path = dist.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, file.content.as_bytes())?;
    }

    let output = Command::new("node")
        .arg(dist.join(&entry_name))
        .current_dir(temp_dir.path())
        .output()?;
    assert!(
        output.status.success(),
        "node failed\nSTDOUT:\n{}\nSTDERR:\n{}\nBUNDLE:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
        manifest.entry.js.content
    );
    Ok(Some(String::from_utf8(output.stdout)?))
}

fn assert_output(files: &[(&str, &str)], entry: &str, expected: &str) -> anyhow::Result<()> {
    if let Some(stdout) = run_bundle(files, entry, |_| {})? {
        assert_eq!(stdout, expected);
    }
    Ok(())
}

#[test]
fn test_cycle_reads_const_after_initialization() -> anyhow::Result<()> {
    assert_output(
        &[
            (
                "a.mjs",
                "import { b } from './b.mjs';\nexport const a = 'A';\nconsole.log(b());\n",
            ),
            (
                "b.mjs",
                "import { a } from './a.mjs';\nexport function b() { return a; }\n",
            ),
        ],
        "a.mjs",
        "A\n",
    )
}

#[test]
fn test_imported_bindings_are_live() -> anyhow::Result<()> {
    assert_output(
        &[
            (
                "main.js",
                "import { count, inc } from './counter.js';\ninc();\nconsole.log(count);\n",
            ),
            (
                "counter.js",
                "export let count = 0;\nexport function inc() { count++; }\n",
            ),
        ],
        "main.js",
        "1\n",
    )
}

#[test]
fn test_anonymous_default_function_is_hoisted_in_a_cycle() -> anyhow::Result<()> {
    assert_output(
        &[
            (
                "a.js",
                "import b from './b.js';\nexport default function () { return 'A'; }\nconsole.log(b);\n",
            ),
            ("b.js", "import a from './a.js';\nexport default a();\n"),
        ],
        "a.js",
        "A\n",
    )
}

#[test]
fn test_shadowed_import_names_keep_their_local_meaning() -> anyhow::Result<()> {
    assert_output(
        &[
            (
                "main.js",
                "import { name } from './name.js';\n\
                 function greet(name) { return 'hi ' + name; }\n\
                 const tagged = { name };\n\
                 console.log(greet('local'), tagged.name);\n",
            ),
            ("name.js", "export const name = 'imported';\n"),
        ],
        "main.js",
        "hi local imported\n",
    )
}

#[test]
fn test_module_scope_may_declare_module_and_exports() -> anyhow::Result<()> {
    assert_output(
        &[(
            "main.js",
            "const module = 'm';\nconst exports = 'e';\nexport { module };\nconsole.log(module, exports);\n",
        )],
        "main.js",
        "m e\n",
    )
}

#[test]
fn test_commonjs_and_module_interop() -> anyhow::Result<()> {
    assert_output(
        &[
            (
                "main.js",
                "import greet, { extra } from './greet.cjs';\nconsole.log(greet('x'), extra);\n",
            ),
            (
                "greet.cjs",
                "const lib = require('./lib.js');\n\
                 module.exports = function greet(n) { return lib.default + ' ' + n; };\n\
                 module.exports.extra = lib.named;\n",
            ),
            ("lib.js", "export default 'hi';\nexport const named = 'N';\n"),
        ],
        "main.js",
        "hi x N\n",
    )
}

#[test]
fn test_re_exports_and_namespaces() -> anyhow::Result<()> {
    assert_output(
        &[
            (
                "main.js",
                "import * as api from './api.js';\nconsole.log(Object.keys(api).sort().join(','), api.two, api.three());\n",
            ),
            (
                "api.js",
                "export * from './one.js';\nexport { default as three, two } from './two.js';\n",
            ),
            ("one.js", "export const one = 1;\n"),
            (
                "two.js",
                "export const two = 2;\nexport default function () { return 3; }\n",
            ),
        ],
        "main.js",
        "one,three,two 2 3\n",
    )
}

#[test]
fn test_dynamic_import_loads_side_chunk() -> anyhow::Result<()> {
    let files = [
        (
            "main.js",
            "import('./lazy.js').then((m) => console.log(m.run()));\n",
        ),
        (
            "lazy.js",
            "import { helper } from './helper.js';\nexport function run() { return helper(); }\n",
        ),
        ("helper.js", "export const helper = () => 42;\n"),
    ];
    let split = run_bundle(&files, "main.js", |config| config.split = SplitPolicy::Dynamic)?;
    let nested = run_bundle(&files, "main.js", |config| {
        config.split = SplitPolicy::Dynamic;
        config.entry_name = "js/app.js".into();
    })?;
    for stdout in [split, nested].into_iter().flatten() {
        assert_eq!(stdout, "42\n");
    }
    Ok(())
}
