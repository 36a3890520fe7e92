//! Re-execution of a single captured shader invocation group.
//!
//! A [`program::Program`] is indexed once per session, every lane of the
//! group gets its own [`exec::ThreadState`], and the [`debugger::Debugger`]
//! advances them in lock-step so quad derivatives and reconvergence behave
//! like they did on the GPU. Everything outside the shader (buffers,
//! textures, captured inputs) is reached through [`api::DebugApiWrapper`].

pub mod api;
pub mod debugger;
pub mod exec;
pub mod extinst;
pub mod id;
pub mod program;
pub mod util;
pub mod val;

pub use api::capture::{CaptureApi, CaptureFile};
pub use api::{BindingSlot, DebugApiWrapper, DebugMessage, InputSlot, MessageSeverity};
pub use debugger::{Breakpoint, DebugConfig, DebugSetup, Debugger, ShaderDebugState, ShaderDebugTrace};
pub use extinst::{ExtInstContext, ExtInstFn, ExtInstLibrary, ExtInstRegistry};
pub use id::Id;
pub use program::{Program, ProgramBuilder, ProgramIndex};
pub use val::ShaderVariable;
