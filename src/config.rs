use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumAlgo;
use crate::codec::CodecId;

/// Default compression level.  Zstandard honours it; LZ4 ignores it.
pub const DEFAULT_LEVEL: i32 = 3;

/// How containers are written and what a reader expects to find.
///
/// A reader rejects a container whose header disagrees with `codec` or
/// `checksum`; `level` only affects writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    pub codec:    CodecId,
    pub checksum: ChecksumAlgo,
    pub level:    i32,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            codec:    CodecId::Lz4,
            checksum: ChecksumAlgo::Adler32,
            level:    DEFAULT_LEVEL,
        }
    }
}

impl ContainerOptions {
    pub fn with_codec(mut self, codec: CodecId) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumAlgo) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let opts: ContainerOptions = serde_json::from_str(r#"{ "codec": "zstd" }"#).unwrap();
        assert_eq!(opts, ContainerOptions::default().with_codec(CodecId::Zstd));

        let text = serde_json::to_string(&ContainerOptions::default()).unwrap();
        assert_eq!(text, r#"{"codec":"lz4","checksum":"adler32","level":3}"#);
    }
}
