mod arena;
mod backend;
mod call;
mod directory;
mod error;
mod invoker;
mod metafield;
mod result;
mod signature;
mod slots;
mod system;

pub use arena::{ArenaSlice, CANARY_BYTE, CANARY_LEN, IsolationArena, SliceCursor};
pub use backend::{
    FaultClass, FaultPolicy, Handler, NativeBackend, NativeFault, NativeFn, NativeTable, RawCall,
};
pub use call::*;
pub use directory::NativeDirectory;
pub use error::{CallError, ErrorKind, SignatureError};
pub use invoker::*;
pub use metafield::*;
pub use result::{ResultValue, decode_output, decode_primary};
pub use signature::*;
pub use slots::*;
pub use system::OS_PAGE_SIZE;
