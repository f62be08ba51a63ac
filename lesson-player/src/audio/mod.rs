//! Audio resources
//!
//! - `codec`: encoded payload → revocable playable resource, container sniffing
//! - `probe`: clip length and PCM decoding via symphonia

pub mod codec;
pub mod probe;

pub use codec::{
    decode, release, sniff, AudioMime, ContainerSignature, PlayableResource, ResourceId,
    ResourceRef,
};
pub use probe::{ClipInfo, PcmClip};
