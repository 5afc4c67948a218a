use chrono::Utc;

use super::types::Embed;
use crate::config::BrandingConfig;

/// Wraps an embed in the community's banners, colour and footer.
pub fn branded(branding: &BrandingConfig, embed: Embed) -> Vec<Embed> {
    let mut framed = Vec::with_capacity(2);
    if let Some(url) = &branding.top_banner_url {
        framed.push(Embed::new().color(branding.color).image(url.clone()));
    }

    let mut body = embed;
    if body.color.is_none() {
        body.color = Some(branding.color);
    }
    if body.footer.is_none() {
        body = body.footer(branding.footer.clone());
    }
    if body.timestamp.is_none() {
        body = body.timestamp(Utc::now());
    }
    if body.image.is_none() {
        if let Some(url) = &branding.bottom_banner_url {
            body = body.image(url.clone());
        }
    }
    framed.push(body);
    framed
}

/// Cuts `text` to at most `max` characters, marking the cut with "...".
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_adds_banners_and_defaults() {
        let branding = BrandingConfig {
            top_banner_url: Some("https://cdn.example/top.png".into()),
            bottom_banner_url: Some("https://cdn.example/bottom.png".into()),
            ..BrandingConfig::default()
        };
        let framed = branded(&branding, Embed::new().title("Hello"));

        assert_eq!(framed.len(), 2);
        assert_eq!(framed[0].image.as_ref().unwrap().url, "https://cdn.example/top.png");
        assert_eq!(framed[1].color, Some(0x242429));
        assert_eq!(framed[1].footer.as_ref().unwrap().text, "Georgia State Roleplay");
        assert_eq!(framed[1].image.as_ref().unwrap().url, "https://cdn.example/bottom.png");
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("short", 10), "short");
        let long = "x".repeat(1200);
        let cut = truncate(&long, 1000);
        assert_eq!(cut.chars().count(), 1000);
        assert!(cut.ends_with("..."));
    }
}
