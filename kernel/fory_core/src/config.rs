//! Immutable engine configuration.

use fory_buffer::LongEncoding;
use getset::{CopyGetters, Getters};
use typed_builder::TypedBuilder;

/// How struct payloads treat schema differences between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CompatibleMode {
    /// Both peers declare identical structs; fields are written back to back.
    #[default]
    SchemaConsistent,

    /// Peers may add, remove or retype fields independently.
    Compatible,
}

/// Whether and for how long class definitions are shared with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MetaShareMode {
    /// Named types carry their names inline.
    #[default]
    Disabled,

    /// Definitions are sent once per call.
    Scoped,

    /// Definitions are sent once per caller-owned session.
    Full,
}

/// How much of a partially read graph a read failure retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SnapshotMode {
    /// Keep nothing but the count.
    #[default]
    Omit,

    /// Keep a summary of every reconstructed object.
    Full,

    /// Keep a summary of every nth reconstructed object.
    Sampled(usize),
}

/// Engine configuration. Build with [`Config::builder`].
///
/// # Examples
///
/// ```rust
/// use fory_core::config::{CompatibleMode, Config, MetaShareMode};
///
/// let config = Config::builder()
///     .ref_tracking(true)
///     .compatible(CompatibleMode::Compatible)
///     .meta_share(MetaShareMode::Scoped)
///     .build();
///
/// assert!(config.meta_share_active());
/// ```
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, TypedBuilder, Getters, CopyGetters,
)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// Whether shared and circular references are preserved.
    #[builder(default)]
    #[get_copy = "pub"]
    ref_tracking: bool,

    /// Whether booleans, integers and floats skip reference tracking.
    #[builder(default = true)]
    #[get_copy = "pub"]
    basic_types_ref_ignored: bool,

    /// Whether strings skip reference tracking.
    #[builder(default = true)]
    #[get_copy = "pub"]
    string_ref_ignored: bool,

    /// Whether timestamps and dates skip reference tracking.
    #[builder(default = true)]
    #[get_copy = "pub"]
    time_ref_ignored: bool,

    /// Whether 32-bit integers are written as zig-zag varints.
    #[builder(default = true)]
    #[get_copy = "pub"]
    compress_int: bool,

    /// The encoding of 64-bit integers.
    #[builder(default)]
    #[get_copy = "pub"]
    long_encoding: LongEncoding,

    /// Whether every user type must be registered before use.
    #[builder(default = true)]
    #[get_copy = "pub"]
    require_registration: bool,

    /// How struct payloads handle schema differences.
    #[builder(default)]
    #[get_copy = "pub"]
    compatible: CompatibleMode,

    /// Whether class definitions are shared with the peer.
    #[builder(default)]
    #[get_copy = "pub"]
    meta_share: MetaShareMode,

    /// Whether enums are written by variant name instead of ordinal.
    #[builder(default)]
    #[get_copy = "pub"]
    enum_by_name: bool,

    /// Whether schema-consistent structs carry a fingerprint the reader
    /// verifies.
    #[builder(default = true)]
    #[get_copy = "pub"]
    check_struct_hash: bool,

    /// Whether structs of unknown names are read into placeholders instead of
    /// failing. Needs meta sharing, which carries their definitions.
    #[builder(default)]
    #[get_copy = "pub"]
    deserialize_nonexistent: bool,

    /// Deepest value nesting accepted on write and read.
    #[builder(default = 1024)]
    #[get_copy = "pub"]
    max_depth: usize,

    /// Which reconstructed objects a read failure reports.
    #[builder(default)]
    #[get_copy = "pub"]
    snapshot: SnapshotMode,

    /// Most object summaries a read failure reports.
    #[builder(default = 32)]
    #[get_copy = "pub"]
    snapshot_limit: usize,

    /// Qualified names that may never be serialized or deserialized. A
    /// trailing `*` matches by prefix.
    #[builder(default, setter(into))]
    #[get = "pub"]
    disallowed_types: Vec<String>,
}

impl Default for Config {
    fn default() -> Self { Self::builder().build() }
}

impl Config {
    /// Whether class definitions travel with the stream. Meta sharing only
    /// applies in compatible mode.
    #[must_use]
    pub fn meta_share_active(&self) -> bool {
        self.compatible == CompatibleMode::Compatible
            && self.meta_share != MetaShareMode::Disabled
    }
}
