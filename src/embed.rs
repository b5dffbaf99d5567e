//! Video embed markup for posts.
//!
//! The identifier goes into the frame URL as given; the video host decides
//! what an unknown id looks like.

/// Base URL of embedded players.
const YOUTUBE_EMBED: &str = "https://www.youtube.com/embed/";

/// Permissions granted to the player frame.
const FRAME_ALLOW: &str =
    "accelerometer; autoplay; clipboard-write; encrypted-media; gyroscope; picture-in-picture";

/// Markup of a responsive video frame for `id` with accessible `title`.
pub fn youtube(id: &str, title: &str) -> String {
    let src = format!("{YOUTUBE_EMBED}{id}");
    format!(
        concat!(
            r#"<div class="video">"#,
            r#"<iframe src="{src}" title="{title}" allow="{allow}" "#,
            r#"frameborder="0" webkitallowfullscreen="true" mozallowfullscreen="true" allowfullscreen>"#,
            "</iframe></div>"
        ),
        src = escape_attr(&src),
        title = escape_attr(title),
        allow = FRAME_ALLOW,
    )
}

/// Escape a value for a double-quoted HTML attribute.
fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
