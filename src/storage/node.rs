use crate::error::DbResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Directory,
    File,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Directory => "Directory",
            NodeType::File => "File",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHeader {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub ispublic: bool,
    /// RFC 3339 creation timestamp.
    pub created: String,
    /// Absolute path of the containing directory; empty for the root.
    pub parent: String,
}

/// Attachment metadata. An empty `filepointer` means no attachment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BytesHeader {
    pub filepointer: String,
    pub mime: String,
    pub size: u64,
}

/// A directory or file record of the flat node collection.
///
/// Serializes to the document shape queried by filters:
/// `{_id, __header__, __bytes__, content}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "__header__")]
    pub header: NodeHeader,
    #[serde(rename = "__bytes__", default)]
    pub bytes: BytesHeader,
    #[serde(default)]
    pub content: Map<String, Value>,
}

impl Node {
    pub fn directory(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self::new(name.into(), parent.into(), NodeType::Directory, Map::new())
    }

    pub fn file(
        name: impl Into<String>,
        parent: impl Into<String>,
        content: Map<String, Value>,
    ) -> Self {
        Self::new(name.into(), parent.into(), NodeType::File, content)
    }

    /// The root directory of a fresh database: public, named `/`, no parent.
    pub fn root() -> Self {
        let mut root = Self::directory("/", "");
        root.header.ispublic = true;
        root
    }

    fn new(name: String, parent: String, node_type: NodeType, content: Map<String, Value>) -> Self {
        Self {
            id: new_node_id(),
            header: NodeHeader {
                name,
                node_type,
                ispublic: false,
                created: timestamp(),
                parent,
            },
            bytes: BytesHeader::default(),
            content,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.header.node_type == NodeType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.header.node_type == NodeType::File
    }

    pub fn has_attachment(&self) -> bool {
        !self.bytes.filepointer.is_empty()
    }

    /// Absolute path of this node.
    pub fn path(&self) -> String {
        if self.header.parent.is_empty() {
            return self.header.name.clone();
        }
        crate::vfs::path::join(&self.header.parent, &self.header.name)
    }

    /// Same node under a fresh identifier and creation time.
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.id = new_node_id();
        copy.header.created = timestamp();
        copy
    }

    pub fn to_document(&self) -> DbResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_document(document: Value) -> DbResult<Self> {
        Ok(serde_json::from_value(document)?)
    }

    pub fn encode(&self) -> DbResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Random v4 UUID without dashes.
pub fn new_node_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
