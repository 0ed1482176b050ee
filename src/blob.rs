//! Raw capture input.
//!
//! A [`CaptureBlob`] is the finalized recording handed over by the capture
//! collaborator: encoded container bytes plus a container tag. The tag is
//! either a MIME type (`audio/webm`) or a bare file extension (`webm`); we
//! only use it as a probing hint, the decoders sniff the actual bytes.

/// A finalized capture: encoded audio bytes plus a container tag.
///
/// Immutable once constructed. Ownership moves from the capture collaborator
/// to the controller, and from there to the transcode engine.
#[derive(Debug, Clone)]
pub struct CaptureBlob {
    bytes: Vec<u8>,
    container: String,
}

impl CaptureBlob {
    /// Wrap raw capture bytes with their container tag.
    ///
    /// No validation happens here; the engine rejects empty buffers and blank
    /// tags when a conversion is requested.
    pub fn new(bytes: Vec<u8>, container: impl Into<String>) -> Self {
        Self {
            bytes,
            container: container.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The container tag as supplied by the capture collaborator.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Reduce the container tag to a file extension usable as a probe hint.
    ///
    /// MIME types are mapped to their conventional extension; anything else is
    /// treated as an extension already (lowercased, leading dot stripped).
    /// Returns `None` when the tag is blank.
    pub fn hint_extension(&self) -> Option<String> {
        let tag = self.container.trim().to_ascii_lowercase();
        if tag.is_empty() {
            return None;
        }

        // MIME parameters ("audio/webm;codecs=opus") don't affect the hint.
        let tag = tag.split(';').next().unwrap_or(&tag).trim().to_owned();

        let ext = match tag.as_str() {
            "audio/webm" | "video/webm" => "webm",
            "audio/ogg" | "application/ogg" => "ogg",
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/mp4" | "video/mp4" | "audio/m4a" | "audio/x-m4a" => "mp4",
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            "audio/flac" | "audio/x-flac" => "flac",
            "audio/aac" => "aac",
            other => other.rsplit('/').next().unwrap_or(other),
        };

        let ext = ext.trim_start_matches('.');
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_extension_maps_common_mime_types() {
        let cases = [
            ("audio/webm", "webm"),
            ("audio/webm;codecs=opus", "webm"),
            ("audio/ogg", "ogg"),
            ("audio/mpeg", "mp3"),
            ("audio/x-wav", "wav"),
            ("video/mp4", "mp4"),
        ];
        for (tag, want) in cases {
            let blob = CaptureBlob::new(vec![0], tag);
            assert_eq!(blob.hint_extension().as_deref(), Some(want), "tag {tag}");
        }
    }

    #[test]
    fn hint_extension_passes_bare_extensions_through() {
        assert_eq!(
            CaptureBlob::new(vec![0], "WAV").hint_extension().as_deref(),
            Some("wav")
        );
        assert_eq!(
            CaptureBlob::new(vec![0], ".ogg").hint_extension().as_deref(),
            Some("ogg")
        );
    }

    #[test]
    fn hint_extension_is_none_for_blank_tags() {
        assert_eq!(CaptureBlob::new(vec![0], "").hint_extension(), None);
        assert_eq!(CaptureBlob::new(vec![0], "   ").hint_extension(), None);
    }
}
