//! Web app manifest model
//!
//! The manifest served at `/manifest.json` is precached by the worker and
//! must describe an installable standalone app with a full icon set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Icon sizes (square, in pixels) the manifest must cover.
pub const REQUIRED_ICON_SIZES: [u32; 8] = [72, 96, 128, 144, 152, 192, 384, 512];

/// A web app manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebAppManifest {
    pub name: String,
    pub short_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_url: String,
    pub display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
    #[serde(default)]
    pub icons: Vec<ManifestIcon>,
}

/// A manifest icon entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestIcon {
    pub src: String,
    /// Space-separated `WxH` tokens, e.g. `"192x192"` or `"48x48 96x96"`
    pub sizes: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl ManifestIcon {
    /// Parsed `(width, height)` pairs; malformed tokens are skipped.
    pub fn dimensions(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.sizes.split_whitespace().filter_map(|token| {
            let (w, h) = token.split_once(['x', 'X'])?;
            Some((w.parse().ok()?, h.parse().ok()?))
        })
    }
}

impl WebAppManifest {
    /// Parse a manifest from JSON.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Square icon sizes declared across all icons.
    pub fn icon_sizes(&self) -> BTreeSet<u32> {
        self.icons
            .iter()
            .flat_map(|icon| icon.dimensions())
            .filter(|(w, h)| w == h)
            .map(|(w, _)| w)
            .collect()
    }

    /// Required sizes the icon set does not cover.
    pub fn missing_icon_sizes(&self) -> Vec<u32> {
        let declared = self.icon_sizes();
        REQUIRED_ICON_SIZES
            .iter()
            .copied()
            .filter(|size| !declared.contains(size))
            .collect()
    }

    /// Check that the manifest describes an installable standalone app.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() || self.short_name.trim().is_empty() {
            return Err(CoreError::manifest("name and short_name are required"));
        }
        if self.start_url != "/" {
            return Err(CoreError::manifest(format!(
                "start_url must be \"/\", got {:?}",
                self.start_url
            )));
        }
        if self.display != "standalone" {
            return Err(CoreError::manifest(format!(
                "display must be \"standalone\", got {:?}",
                self.display
            )));
        }
        if self.icons.is_empty() {
            return Err(CoreError::manifest("icons must not be empty"));
        }
        let missing = self.missing_icon_sizes();
        if !missing.is_empty() {
            return Err(CoreError::manifest(format!(
                "missing icon sizes: {missing:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIPPED: &str = include_str!("../../../public/manifest.json");

    #[test]
    fn test_shipped_manifest_is_complete() {
        let manifest = WebAppManifest::from_json_str(SHIPPED).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.start_url, "/");
        assert_eq!(manifest.display, "standalone");
        for size in REQUIRED_ICON_SIZES {
            assert!(manifest.icon_sizes().contains(&size), "missing {size}x{size}");
        }
    }

    #[test]
    fn test_icon_dimensions_parse_multiple_tokens() {
        let icon = ManifestIcon {
            src: "/favicon.ico".to_string(),
            sizes: "16x16 32x32 bogus 64X64".to_string(),
            mime_type: None,
            purpose: None,
        };
        let dims: Vec<_> = icon.dimensions().collect();
        assert_eq!(dims, vec![(16, 16), (32, 32), (64, 64)]);
    }

    #[test]
    fn test_missing_sizes_are_reported() {
        let manifest = WebAppManifest::from_json_str(
            r#"{
                "name": "LIVRIA",
                "short_name": "LIVRIA",
                "start_url": "/",
                "display": "standalone",
                "icons": [{ "src": "/icons/icon-192x192.png", "sizes": "192x192" }]
            }"#,
        )
        .unwrap();

        assert_eq!(
            manifest.missing_icon_sizes(),
            vec![72, 96, 128, 144, 152, 384, 512]
        );
        assert!(matches!(manifest.validate(), Err(CoreError::Manifest(_))));
    }

    #[test]
    fn test_wrong_display_mode_is_rejected() {
        let mut manifest = WebAppManifest::from_json_str(SHIPPED).unwrap();
        manifest.display = "browser".to_string();
        assert!(manifest.validate().is_err());
    }
}
