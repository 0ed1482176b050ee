/// Out-of-process backend driving an external transcoding executable.
pub mod process;

/// In-process backend running the filter chain on a sandboxed scratch space.
pub mod sandbox;
