//! Test-only fakes for the native seams, plus a compiled C fixture.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use anyhow::{Context, Result, bail};

use crate::core::run_options::RunOptions;
use crate::core::signature::{Executable, FunctionSignature, Parameter};
use crate::core::types::{BoundValue, Scalar, TypeTag};
use crate::error::RunError;
use crate::io::execution::{CommandLauncher, LaunchOutcome};
use crate::io::native::{LibraryLoader, LoadedLibrary};
use crate::io::run_option_interpreter::RunOptionInterpreter;

type SymbolFn = Rc<dyn Fn(&[BoundValue]) -> Result<Option<Scalar>, RunError>>;

#[derive(Default)]
struct FakeLibraryState {
    symbols: BTreeMap<String, SymbolFn>,
    calls: Vec<String>,
}

/// In-memory [`LoadedLibrary`] whose symbols are closures.
///
/// Clones share symbols and the call log.
#[derive(Clone)]
pub struct FakeLibrary {
    path: PathBuf,
    state: Rc<RefCell<FakeLibraryState>>,
}

impl FakeLibrary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Rc::default(),
        }
    }

    pub fn with_symbol<F>(self, name: &str, body: F) -> Self
    where
        F: Fn(&[BoundValue]) -> Result<Option<Scalar>, RunError> + 'static,
    {
        self.state
            .borrow_mut()
            .symbols
            .insert(name.to_string(), Rc::new(body));
        self
    }

    /// Symbols passed to `call`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Stable made-up address of `name`.
    pub fn address_of(&self, name: &str) -> Option<u64> {
        let state = self.state.borrow();
        let index = state.symbols.keys().position(|key| key == name)?;
        Some(0x1000 * (index as u64 + 1))
    }
}

impl LoadedLibrary for FakeLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_symbol(&self, symbol: &str) -> bool {
        self.state.borrow().symbols.contains_key(symbol)
    }

    fn symbol_address(&self, symbol: &str) -> Result<u64, RunError> {
        self.address_of(symbol)
            .ok_or_else(|| RunError::Runner(format!("missing symbol '{symbol}'")))
    }

    fn call(
        &self,
        symbol: &str,
        _return_type: Option<TypeTag>,
        arguments: &[BoundValue],
    ) -> Result<Option<Scalar>, RunError> {
        let body = self
            .state
            .borrow()
            .symbols
            .get(symbol)
            .cloned()
            .ok_or_else(|| RunError::Runner(format!("missing symbol '{symbol}'")))?;
        self.state.borrow_mut().calls.push(symbol.to_string());
        body(arguments)
    }
}

/// [`LibraryLoader`] serving [`FakeLibrary`]s by path.
#[derive(Default)]
pub struct FakeLoader {
    libraries: BTreeMap<PathBuf, FakeLibrary>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(mut self, library: FakeLibrary) -> Self {
        self.libraries.insert(library.path.clone(), library);
        self
    }
}

impl LibraryLoader for FakeLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn LoadedLibrary>, RunError> {
        self.libraries
            .get(path)
            .cloned()
            .map(|library| Box::new(library) as Box<dyn LoadedLibrary>)
            .ok_or_else(|| RunError::Runner(format!("couldn't load library {}", path.display())))
    }
}

#[derive(Default)]
struct RecordingState {
    events: Vec<String>,
    depth: i32,
}

/// [`RunOptionInterpreter`] that logs apply/revert instead of touching the process.
#[derive(Clone, Default)]
pub struct RecordingInterpreter {
    fail_apply: bool,
    state: Rc<RefCell<RecordingState>>,
}

impl RecordingInterpreter {
    /// Interpreter whose `apply` changes state and then fails.
    pub fn failing_apply() -> Self {
        Self {
            fail_apply: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    /// Applies not yet reverted.
    pub fn depth(&self) -> i32 {
        self.state.borrow().depth
    }
}

impl RunOptionInterpreter for RecordingInterpreter {
    fn apply(&mut self, _options: &RunOptions) -> Result<(), RunError> {
        let mut state = self.state.borrow_mut();
        state.events.push("apply".to_string());
        state.depth += 1;
        if self.fail_apply {
            return Err(RunError::InvalidRunOption("refused by test".to_string()));
        }
        Ok(())
    }

    fn revert(&mut self) -> Result<(), RunError> {
        let mut state = self.state.borrow_mut();
        state.events.push("revert".to_string());
        state.depth -= 1;
        Ok(())
    }
}

type LaunchFn = dyn Fn(&Path, &Path) -> Result<LaunchOutcome>;

/// [`CommandLauncher`] that runs a closure instead of a process.
pub struct FakeLauncher {
    body: Box<LaunchFn>,
}

impl FakeLauncher {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Path, &Path) -> Result<LaunchOutcome> + 'static,
    {
        Self {
            body: Box::new(body),
        }
    }
}

impl CommandLauncher for FakeLauncher {
    fn launch(
        &self,
        batch_path: &Path,
        results_path: &Path,
        _working_dir: Option<&Path>,
    ) -> Result<LaunchOutcome> {
        (self.body)(batch_path, results_path)
    }
}

const FIXTURE_SOURCE: &str = r#"
#include <stdbool.h>
#include <stdio.h>
#include <stdlib.h>
#include <string.h>

static long calls = 0;
static int cycles = 0;

int double_it(int a) { calls++; return a * 2; }

long sum(long a, long b, long c) { calls++; return a + b + c; }

double scale(double x, float factor) { calls++; return x * factor; }

int env_number(void) {
    const char *value = getenv("NUMBER");
    calls++;
    return value ? atoi(value) : -1;
}

void crash(void) { abort(); }

int read_number(const char *path) {
    FILE *f = fopen(path, "r");
    int n = -1;
    if (!f) return -1;
    if (fscanf(f, "%d", &n) != 1) n = -1;
    fclose(f);
    return n;
}

void write_number(const char *path, int n) {
    FILE *f = fopen(path, "w");
    if (!f) return;
    fprintf(f, "%d\n", n);
    fclose(f);
}

int apply(int (*f)(int), int x) { return f(x); }

const char *greet(void) { return "hello"; }

void clear_perf_counters(void) { cycles = 0; }

void clear_stats(void) { calls = 0; }

bool add_perf_counter(const char *name) {
    if (strcmp(name, "CYCLES") != 0) return false;
    cycles = 1;
    return true;
}

void write_stats(const char *path) {
    FILE *f = fopen(path, "w");
    if (!f) return;
    if (cycles) fprintf(f, "calls,CYCLES\n%ld,1000\n", calls);
    else fprintf(f, "calls\n%ld\n", calls);
    fclose(f);
}
"#;

/// Compile the C fixture into `dir/build/libfixture.so` with the system `cc`.
///
/// The library is its own instrumentation runtime: it exports the four hooks,
/// accepts the `CYCLES` counter, and reports how many calls it served.
pub fn build_fixture(dir: &Path) -> Result<Executable> {
    let build = dir.join("build");
    fs::create_dir_all(&build).with_context(|| format!("create {}", build.display()))?;
    let source = dir.join("fixture.c");
    fs::write(&source, FIXTURE_SOURCE).context("write fixture source")?;
    let library = build.join("libfixture.so");
    let output = Command::new("cc")
        .args(["-shared", "-fPIC", "-O1", "-o"])
        .arg(&library)
        .arg(&source)
        .output()
        .context("run cc")?;
    if !output.status.success() {
        bail!(
            "cc failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let int = |name: &str| Parameter::new(name, TypeTag::Int);
    Ok(Executable::new(library, build)
        .with_source_file(source)
        .with_function(FunctionSignature::new(
            "double_it",
            Some(TypeTag::Int),
            vec![int("a")],
        ))
        .with_function(FunctionSignature::new(
            "sum",
            Some(TypeTag::Long),
            vec![
                Parameter::new("a", TypeTag::Long),
                Parameter::new("b", TypeTag::Long),
                Parameter::new("c", TypeTag::Long),
            ],
        ))
        .with_function(FunctionSignature::new(
            "scale",
            Some(TypeTag::Double),
            vec![
                Parameter::new("x", TypeTag::Double),
                Parameter::new("factor", TypeTag::Float),
            ],
        ))
        .with_function(FunctionSignature::new(
            "env_number",
            Some(TypeTag::Int),
            Vec::new(),
        ))
        .with_function(FunctionSignature::new("crash", None, Vec::new()))
        .with_function(FunctionSignature::new(
            "read_number",
            Some(TypeTag::Int),
            vec![Parameter::new("path", TypeTag::CharPtr)],
        ))
        .with_function(FunctionSignature::new(
            "write_number",
            None,
            vec![Parameter::new("path", TypeTag::CharPtr), int("n")],
        ))
        .with_function(FunctionSignature::new(
            "apply",
            Some(TypeTag::Int),
            vec![Parameter::new("f", TypeTag::FunctionPointer), int("x")],
        ))
        .with_function(FunctionSignature::new(
            "greet",
            Some(TypeTag::CharPtr),
            Vec::new(),
        ))
        .with_function(FunctionSignature::new("not_exported", None, Vec::new())))
}
