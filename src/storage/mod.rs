pub mod blob;
pub mod filter;
pub mod memory;
pub mod node;
pub mod rocks;
pub mod store;

pub use blob::{sniff_mime, BlobInfo, ByteStore, MemoryByteStore};
pub use filter::{HeaderChange, Matcher, NodeFilter, NodeUpdate};
pub use memory::MemoryNodeStore;
pub use node::{BytesHeader, Node, NodeHeader, NodeType};
pub use rocks::RocksStore;
pub use store::NodeStore;
