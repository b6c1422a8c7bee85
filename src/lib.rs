pub mod utils;
pub mod gpu;
pub mod window;
pub mod ffi;

pub use utils::Handle;
pub use window::{NativeWindow, WindowService};

pub use gpu::*;
