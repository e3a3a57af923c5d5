//! Tracing JIT compiler core for a NaN-boxed, dynamically typed bytecode VM.
//!
//! This crate implements the four subsystems described in the project's design: a
//! [`recorder`] that turns one hot-loop iteration into SSA [`ir`], an [`opt`] pipeline of
//! fixed passes over that IR, a linear-scan [`regalloc`], and a [`codegen`] stage that
//! lowers the optimized IR to native code through an externally supplied assembler
//! backend. [`jit`] ties the four together behind a trace cache and a deoptimizer.
//!
//! The host virtual machine, its NaN-boxed value representation, garbage collector, and
//! the native assembler/executable-memory backend are all external collaborators; this
//! crate only consumes the interfaces declared in [`host`] and [`codegen::backend`].

#![warn(unused_import_braces)]
#![deny(unused_must_use)]

pub mod codegen;
pub mod config;
pub mod error;
pub mod host;
pub mod ir;
pub mod jit;
pub mod opt;
pub mod recorder;
pub mod regalloc;

pub use config::JitConfig;
pub use error::{CompileError, CoreBug, RecordAbort};
pub use jit::cache::TraceCache;
pub use jit::trace::CompiledTrace;
