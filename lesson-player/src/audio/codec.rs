//! Resource codec
//!
//! Turns a segment's encoded audio payload into a [`PlayableResource`]: the
//! transport encoding is removed, the container is sniffed from its magic
//! bytes to pick a playback MIME type, and the decoded bytes are wrapped in a
//! revocable handle.
//!
//! # Ownership
//!
//! A `PlayableResource` owns its decoded bytes and is never shared across
//! segments. The playback device only ever holds [`ResourceRef`]s, cheap
//! handles that observe the owner's lifetime: once the resource is released
//! (or dropped) every outstanding `ResourceRef` reports it as released and
//! any further playback call on it is rejected.

use crate::error::{DecodeError, PlaybackRejected};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lesson_common::EncodedAudio;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Identity of one decoded resource
///
/// The resume rule compares identities, never file names or contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(Uuid);

impl ResourceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Playback MIME family selected from the container header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioMime {
    /// WAV family (`audio/wav`)
    Wav,
    /// MP3 family (`audio/mpeg`)
    Mpeg,
}

impl AudioMime {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioMime::Wav => "audio/wav",
            AudioMime::Mpeg => "audio/mpeg",
        }
    }

    /// Conventional file extension, used as a decoder hint
    pub fn extension(&self) -> &'static str {
        match self {
            AudioMime::Wav => "wav",
            AudioMime::Mpeg => "mp3",
        }
    }
}

impl std::fmt::Display for AudioMime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which header pattern matched during sniffing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerSignature {
    /// `RIFF` container signature
    Riff,
    /// ID3v2 tag ahead of MPEG frames
    Id3,
    /// Bare MPEG audio frame sync
    FrameSync,
    /// Nothing recognised
    Unknown,
}

/// Identify the container family from the first bytes of a decoded buffer
///
/// Unrecognised headers default to the MP3 family, the more common output
/// of speech synthesis services.
pub fn sniff(bytes: &[u8]) -> (AudioMime, ContainerSignature) {
    if bytes.len() >= 4 && &bytes[..4] == b"RIFF" {
        return (AudioMime::Wav, ContainerSignature::Riff);
    }
    if bytes.len() >= 3 && &bytes[..3] == b"ID3" {
        return (AudioMime::Mpeg, ContainerSignature::Id3);
    }
    // 11-bit frame sync: 0xFF followed by the top three bits set
    if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
        return (AudioMime::Mpeg, ContainerSignature::FrameSync);
    }
    (AudioMime::Mpeg, ContainerSignature::Unknown)
}

/// Shared storage for decoded bytes; emptied on release
#[derive(Debug)]
struct ResourceCell {
    bytes: RwLock<Option<Arc<[u8]>>>,
}

/// Decoded, revocable audio resource backing one segment
#[derive(Debug)]
pub struct PlayableResource {
    id: ResourceId,
    mime: AudioMime,
    signature: ContainerSignature,
    url: String,
    len: usize,
    cell: Arc<ResourceCell>,
}

impl PlayableResource {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        let (mime, signature) = sniff(&bytes);
        let id = ResourceId::new();
        let len = bytes.len();
        Self {
            id,
            mime,
            signature,
            url: format!("blob:lesson-audio/{}", id),
            len,
            cell: Arc::new(ResourceCell {
                bytes: RwLock::new(Some(Arc::from(bytes))),
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn mime(&self) -> AudioMime {
        self.mime
    }

    pub fn signature(&self) -> ContainerSignature {
        self.signature
    }

    /// Playable reference string (`blob:lesson-audio/<id>`)
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Decoded size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Handle to attach to a playback device
    pub fn source(&self) -> ResourceRef {
        ResourceRef {
            id: self.id,
            mime: self.mime,
            url: self.url.clone(),
            cell: Arc::clone(&self.cell),
        }
    }

    /// Release the decoded bytes
    ///
    /// Consumes the resource, so it can be released at most once. Callers
    /// must detach it from the playback device first.
    pub fn release(self) {
        debug!("Releasing audio resource {} ({} bytes)", self.id, self.len);
        // Drop does the revocation
    }
}

impl Drop for PlayableResource {
    fn drop(&mut self) {
        if self.cell.bytes.write().take().is_some() {
            trace!("Audio resource {} revoked", self.id);
        }
    }
}

/// Handle to a [`PlayableResource`] held by the playback device
#[derive(Debug, Clone)]
pub struct ResourceRef {
    id: ResourceId,
    mime: AudioMime,
    url: String,
    cell: Arc<ResourceCell>,
}

impl ResourceRef {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn mime(&self) -> AudioMime {
        self.mime
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Decoded bytes, unless the owning resource was released
    pub fn bytes(&self) -> Result<Arc<[u8]>, PlaybackRejected> {
        self.cell
            .bytes
            .read()
            .as_ref()
            .cloned()
            .ok_or(PlaybackRejected::Released(self.id))
    }

    pub fn is_released(&self) -> bool {
        self.cell.bytes.read().is_none()
    }
}

/// Decode an encoded audio payload into a playable resource
///
/// Accepts a single transport-encoded string or a list of chunks (each
/// decoded separately, bytes joined in order). A `data:` URI prefix and
/// ASCII whitespace are ignored.
pub fn decode(payload: &EncodedAudio) -> Result<PlayableResource, DecodeError> {
    let mut bytes = Vec::new();
    for (i, chunk) in payload.chunks().enumerate() {
        let text = strip_data_uri(chunk);
        let cleaned: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if cleaned.is_empty() {
            continue;
        }
        let decoded = STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| DecodeError::Transport(format!("chunk {}: {}", i, e)))?;
        bytes.extend_from_slice(&decoded);
    }

    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let resource = PlayableResource::from_bytes(bytes);
    debug!(
        "Decoded audio resource {}: {} bytes, {} ({:?})",
        resource.id, resource.len, resource.mime, resource.signature
    );
    Ok(resource)
}

/// Release a resource (free-function form of [`PlayableResource::release`])
pub fn release(resource: PlayableResource) {
    resource.release();
}

fn strip_data_uri(text: &str) -> &str {
    let trimmed = text.trim_start();
    if trimmed.starts_with("data:") {
        match trimmed.split_once(',') {
            Some((_, body)) => body,
            None => "",
        }
    } else {
        text
    }
}
