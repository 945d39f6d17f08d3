//! The [ImageRequest] describes one fetch: what image, at what size, and which other renditions may stand in for it.
use std::fmt;

use crate::keys;
use crate::Size;

/// Ordered list of alternate size tags which may be substituted from disk, most useful first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReusePolicy {
    size_tags: Vec<String>,
}

impl ReusePolicy {
    pub fn new<I, S>(size_tags: I) -> ReusePolicy
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ReusePolicy {
            size_tags: size_tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn size_tags(&self) -> &[String] {
        &self.size_tags
    }
}

#[derive(Clone, Debug)]
pub struct ImageRequest {
    origin_url: String,
    identity_url: String,
    remote_url: String,
    target: Size,
    size_tag: String,
    identity_key: Option<String>,
    reuse: Option<ReusePolicy>,
    /// Filled in by the bounds-only decode pass of each fetch.
    origin_size: Option<Size>,
}

impl ImageRequest {
    /// A request where the origin, identity and remote urls are all `url`.
    pub fn new(url: impl Into<String>, target: Size) -> ImageRequest {
        let url = url.into();
        ImageRequest {
            origin_url: url.clone(),
            identity_url: url.clone(),
            remote_url: url,
            size_tag: keys::size_tag(target),
            target,
            identity_key: None,
            reuse: None,
            origin_size: None,
        }
    }

    /// Use a different identity than the origin url, for example one with volatile query parameters stripped.
    pub fn with_identity_url(mut self, identity_url: impl Into<String>) -> ImageRequest {
        self.identity_url = identity_url.into();
        self
    }

    /// Download from somewhere other than the origin url, for example a resizing CDN.
    pub fn with_remote_url(mut self, remote_url: impl Into<String>) -> ImageRequest {
        self.remote_url = remote_url.into();
        self
    }

    /// Name this rendition, so other requests can list it in their [ReusePolicy].  Defaults to `WxH`.
    pub fn with_size_tag(mut self, size_tag: impl Into<String>) -> ImageRequest {
        self.size_tag = size_tag.into();
        self
    }

    /// Override the memory tier key.
    pub fn with_identity_key(mut self, identity_key: impl Into<String>) -> ImageRequest {
        self.identity_key = Some(identity_key.into());
        self
    }

    pub fn with_reuse_policy(mut self, reuse: ReusePolicy) -> ImageRequest {
        self.reuse = Some(reuse);
        self
    }

    pub fn origin_url(&self) -> &str {
        &self.origin_url
    }

    pub fn identity_url(&self) -> &str {
        &self.identity_url
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub fn target(&self) -> Size {
        self.target
    }

    pub fn size_tag(&self) -> &str {
        &self.size_tag
    }

    pub fn reuse_policy(&self) -> Option<&ReusePolicy> {
        self.reuse.as_ref()
    }

    pub fn identity_key(&self) -> String {
        match &self.identity_key {
            Some(k) => k.clone(),
            None => keys::identity_key(&self.identity_url),
        }
    }

    pub fn file_cache_key(&self) -> String {
        keys::disk_key(&self.identity_url, &self.size_tag)
    }

    /// The disk key another rendition of this image would have been stored under.
    pub fn file_cache_key_for_reuse(&self, size_tag: &str) -> String {
        keys::disk_key(&self.identity_url, size_tag)
    }

    pub fn origin_size(&self) -> Option<Size> {
        self.origin_size
    }

    pub(crate) fn set_origin_size(&mut self, size: Size) {
        self.origin_size = Some(size);
    }
}

impl fmt::Display for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.identity_url, self.size_tag)
    }
}
