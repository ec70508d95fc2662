//! Media treatment: videos, images, figures.

use ego_tree::NodeId;
use scraper::{Html, Selector};
use tracing::debug;

use super::dom;
use super::LinkResolution;
use crate::config::FormatFlags;
use crate::models::{FileTask, TextDirection};
use crate::utils::{encode_article_id, media_base, relative_root_for};

/// Minimum video height; lower values break the player controls.
const MIN_VIDEO_HEIGHT: u32 = 40;

/// Default inner width for thumbs whose image carries no width.
const DEFAULT_THUMB_WIDTH: u32 = 180;

pub struct MediaContext<'a> {
    pub article_id: &'a str,
    pub wiki_base: &'a str,
    pub formats: FormatFlags,
    pub text_direction: TextDirection,
    pub links: &'a LinkResolution,
}

/// Run the media pass; discovered downloads accumulate into `tasks`.
pub fn treat_medias(doc: &mut Html, ctx: &MediaContext<'_>, tasks: &mut Vec<FileTask>) {
    treat_videos(doc, ctx, tasks);
    treat_images(doc, ctx, tasks);
    treat_figures(doc, ctx);
}

/// Resolve a possibly relative media URL against the wiki host.
fn absolute_media_url(wiki_base: &str, raw: &str) -> Option<String> {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    let base = url::Url::parse(wiki_base).ok()?;
    base.join(raw).ok().map(|u| u.to_string())
}

/// The archive-local path for a media URL, plus its download task.
fn local_media_path(ctx: &MediaContext<'_>, raw_url: &str) -> Option<(String, FileTask)> {
    let absolute = absolute_media_url(ctx.wiki_base, raw_url)?;
    let info = media_base(&absolute)?;
    let local = format!(
        "{}I/{}",
        relative_root_for(ctx.article_id),
        encode_article_id(&info.base)
    );
    let task = FileTask {
        width: info.width,
        mult: info.mult,
        ..FileTask::media(info.base, absolute)
    };
    Some((local, task))
}

fn treat_videos(doc: &mut Html, ctx: &MediaContext<'_>, tasks: &mut Vec<FileTask>) {
    let video_selector = Selector::parse("video").expect("static selector");

    for video in dom::select_ids(doc, &video_selector) {
        if ctx.formats.strips_video() {
            dom::detach(doc, video);
            continue;
        }

        dom::set_attr(doc, video, "controls", "");
        if let Some(height) = dom::get_attr(doc, video, "height") {
            if let Ok(h) = height.parse::<u32>() {
                if h < MIN_VIDEO_HEIGHT {
                    dom::set_attr(doc, video, "height", &MIN_VIDEO_HEIGHT.to_string());
                }
            }
        }

        let mut has_poster = false;
        if let Some(poster) = dom::get_attr(doc, video, "poster") {
            if poster.starts_with("../") {
                has_poster = true;
            } else if let Some((local, task)) = local_media_path(ctx, &poster) {
                dom::set_attr(doc, video, "poster", &local);
                tasks.push(task);
                has_poster = true;
            }
        }

        // Keep only the lowest-resolution source.
        let mut sources: Vec<(NodeId, u64, String)> = Vec::new();
        let source_ids: Vec<NodeId> = dom::child_ids(doc, video)
            .into_iter()
            .filter(|id| dom::tag_name(doc, *id).as_deref() == Some("source"))
            .collect();
        for source in source_ids {
            let Some(src) = dom::get_attr(doc, source, "src") else {
                dom::detach(doc, source);
                continue;
            };
            let resolution = source_resolution(doc, source);
            sources.push((source, resolution, src));
        }
        sources.sort_by_key(|(_, resolution, _)| *resolution);

        let mut kept = false;
        for (index, (source, _, src)) in sources.iter().enumerate() {
            if index == 0 {
                if src.starts_with("../") {
                    kept = true;
                    continue;
                }
                if let Some((local, task)) = local_media_path(ctx, src) {
                    dom::set_attr(doc, *source, "src", &local);
                    tasks.push(task);
                    kept = true;
                    continue;
                }
            }
            dom::detach(doc, *source);
        }

        if !kept && !has_poster {
            debug!("dropping video with no usable source or poster");
            dom::detach(doc, video);
        }
    }
}

/// Pixel area of a `<source>`, preferring the original file dimensions.
fn source_resolution(doc: &Html, source: NodeId) -> u64 {
    let dim = |file_attr: &str, attr: &str| -> u64 {
        dom::get_attr(doc, source, file_attr)
            .or_else(|| dom::get_attr(doc, source, attr))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(u64::MAX / 2)
    };
    dim("data-file-width", "data-width").saturating_mul(dim("data-file-height", "data-height"))
}

fn treat_images(doc: &mut Html, ctx: &MediaContext<'_>, tasks: &mut Vec<FileTask>) {
    let img_selector = Selector::parse("img").expect("static selector");

    for img in dom::select_ids(doc, &img_selector) {
        if !dom::is_attached(doc, img) {
            continue;
        }
        let src = dom::get_attr(doc, img, "src").unwrap_or_default();
        // FilePath stubs stay untouched; archive-local srcs are already
        // rewritten.
        if src.starts_with("./Special:FilePath/") || src.starts_with("../") {
            continue;
        }
        let is_math = dom::has_class(doc, img, "mwe-math-fallback-image-inline")
            || dom::has_class(doc, img, "mwe-math-fallback-image-display")
            || ancestor_is_math(doc, img);

        if ctx.formats.strips_pictures() && !is_math {
            dom::detach(doc, img);
            continue;
        }

        // Unwrap plain images out of links to targets the archive will
        // not contain; linked mirrored targets keep their anchor.
        if !is_math {
            if let Some(parent) = dom::parent_id(doc, img) {
                if dom::tag_name(doc, parent).as_deref() == Some("a") {
                    let target = dom::get_attr(doc, parent, "href")
                        .as_deref()
                        .and_then(|href| super::links::href_to_title(href));
                    let keep = target
                        .map(|t| ctx.links.is_reachable(&t))
                        .unwrap_or(false);
                    if !keep {
                        dom::unwrap_node(doc, parent);
                    }
                }
            }
        }

        match local_media_path(ctx, &src) {
            Some((local, task)) => {
                dom::set_attr(doc, img, "src", &local);
                dom::remove_attr(doc, img, "resource");
                dom::remove_attr(doc, img, "srcset");
                tasks.push(task);
            }
            None => {
                debug!("dropping image with unparseable src: {src}");
                dom::detach(doc, img);
            }
        }
    }
}

fn ancestor_is_math(doc: &Html, id: NodeId) -> bool {
    let mut current = dom::parent_id(doc, id);
    while let Some(node) = current {
        if dom::get_attr(doc, node, "typeof").as_deref() == Some("mw:Extension/math") {
            return true;
        }
        current = dom::parent_id(doc, node);
    }
    false
}

fn treat_figures(doc: &mut Html, ctx: &MediaContext<'_>) {
    let figure_selector =
        Selector::parse("figure, span[typeof=\"mw:Image/Frameless\"]").expect("static selector");

    for figure in dom::select_ids(doc, &figure_selector) {
        if !dom::is_attached(doc, figure) {
            continue;
        }
        if !dom::has_descendant_element(doc, figure, &["img", "video"]) {
            dom::detach(doc, figure);
            continue;
        }

        let (thumb_class, centered) = thumb_classes(doc, figure, ctx.text_direction);

        let width = figure_image_width(doc, figure).unwrap_or(DEFAULT_THUMB_WIDTH);
        let inner_width = width + 2;

        let thumb = dom::create_element(doc, "div", &[("class", thumb_class)]);
        let inner = dom::create_element(
            doc,
            "div",
            &[
                ("class", "thumbinner"),
                ("style", &format!("width:{inner_width}px;")),
            ],
        );

        if centered {
            let center = dom::create_element(doc, "center", &[]);
            dom::wrap_node(doc, figure, center);
            dom::wrap_node(doc, figure, thumb);
        } else {
            dom::wrap_node(doc, figure, thumb);
        }
        dom::append_child(doc, thumb, inner);

        // Move the media into the inner wrapper and copy the caption.
        let mut caption = None;
        for child in dom::child_ids(doc, figure) {
            match dom::tag_name(doc, child).as_deref() {
                Some("figcaption") => caption = Some(child),
                Some("img") | Some("video") | Some("a") | Some("span") => {
                    dom::append_child(doc, inner, child);
                }
                _ => {}
            }
        }

        let thumbcaption = dom::create_element(doc, "div", &[("class", "thumbcaption")]);
        dom::append_child(doc, inner, thumbcaption);
        if let Some(caption) = caption {
            for child in dom::child_ids(doc, caption) {
                dom::append_child(doc, thumbcaption, child);
            }
        }

        dom::detach(doc, figure);
    }
}

/// Alignment classes from `mw-halign-*`, with a text-direction default.
fn thumb_classes(
    doc: &Html,
    figure: NodeId,
    direction: TextDirection,
) -> (&'static str, bool) {
    if dom::has_class(doc, figure, "mw-halign-right") {
        ("thumb tright", false)
    } else if dom::has_class(doc, figure, "mw-halign-left") {
        ("thumb tleft", false)
    } else if dom::has_class(doc, figure, "mw-halign-center") {
        ("thumb tnone center", true)
    } else {
        match direction {
            TextDirection::Ltr => ("thumb tright", false),
            TextDirection::Rtl => ("thumb tleft", false),
        }
    }
}

fn figure_image_width(doc: &Html, figure: NodeId) -> Option<u32> {
    let img_selector = Selector::parse("img, video").expect("static selector");
    let descendants = dom::select_ids(doc, &img_selector);
    for candidate in descendants {
        let mut ancestor = Some(candidate);
        while let Some(node) = ancestor {
            if node == figure {
                return dom::get_attr(doc, candidate, "width").and_then(|w| w.parse().ok());
            }
            ancestor = dom::parent_id(doc, node);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn context(links: &LinkResolution) -> MediaContext<'_> {
        MediaContext {
            article_id: "London",
            wiki_base: "https://en.wikipedia.org/",
            formats: FormatFlags::default(),
            text_direction: TextDirection::Ltr,
            links,
        }
    }

    fn no_links() -> LinkResolution {
        LinkResolution {
            mirrored: HashSet::new(),
            redirects: HashMap::new(),
        }
    }

    #[test]
    fn test_image_rewritten_and_enqueued() {
        let links = no_links();
        let ctx = context(&links);
        let mut doc = Html::parse_document(
            "<p><img src=\"//upload.wikimedia.org/wikipedia/commons/thumb/a/ab/Foo.jpg/220px-Foo.jpg\" srcset=\"x 2x\" resource=\"./File:Foo.jpg\"/></p>",
        );
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);

        let html = dom::body_inner_html(&doc);
        assert!(html.contains("src=\"../I/Foo.jpg\""), "{html}");
        assert!(!html.contains("srcset"));
        assert!(!html.contains("resource"));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].path, "Foo.jpg");
        assert_eq!(tasks[0].width, Some(220));
        // The rewritten src is the namespace prefix plus the stored path.
        assert!(html.contains(&format!("../I/{}", tasks[0].path)));
    }

    #[test]
    fn test_special_filepath_images_left_alone() {
        let links = no_links();
        let ctx = context(&links);
        let mut doc =
            Html::parse_document("<p><img src=\"./Special:FilePath/foo\"/></p>");
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);
        assert!(tasks.is_empty());
        assert!(dom::body_inner_html(&doc).contains("./Special:FilePath/foo"));
    }

    #[test]
    fn test_image_unwrapped_from_unmirrored_link() {
        let links = no_links();
        let ctx = context(&links);
        let mut doc = Html::parse_document(
            "<p><a href=\"./Somewhere_Unknown\"><img src=\"https://u.org/a/ab/X.png\"/></a></p>",
        );
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);
        let html = dom::body_inner_html(&doc);
        assert!(!html.contains("<a "), "{html}");
        assert!(html.contains("<img"));
    }

    #[test]
    fn test_image_keeps_link_to_mirrored_target() {
        let mut links = no_links();
        links.mirrored.insert("File:X.png".to_string());
        let ctx = context(&links);
        let mut doc = Html::parse_document(
            "<p><a href=\"./File:X.png\"><img src=\"https://u.org/a/ab/X.png\"/></a></p>",
        );
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);
        assert!(dom::body_inner_html(&doc).contains("<a "));
    }

    #[test]
    fn test_video_without_source_or_poster_deleted() {
        let links = no_links();
        let ctx = context(&links);
        let mut doc = Html::parse_document("<p><video height=\"20\"></video></p>");
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);
        assert!(!dom::body_inner_html(&doc).contains("<video"));
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_video_keeps_lowest_resolution_source() {
        let links = no_links();
        let ctx = context(&links);
        let mut doc = Html::parse_document(
            "<p><video height=\"20\" poster=\"https://u.org/a/ab/P.jpg\">\
             <source src=\"https://u.org/a/ab/big.webm\" data-file-width=\"1920\" data-file-height=\"1080\"/>\
             <source src=\"https://u.org/a/ab/small.webm\" data-file-width=\"640\" data-file-height=\"360\"/>\
             </video></p>",
        );
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);

        let html = dom::body_inner_html(&doc);
        assert!(html.contains("small.webm"), "{html}");
        assert!(!html.contains("big.webm"));
        assert!(html.contains("controls"));
        assert!(html.contains("height=\"40\""));
        assert!(html.contains("poster=\"../I/P.jpg\""));
        let paths: Vec<_> = tasks.iter().map(|t| t.path.as_str()).collect();
        assert!(paths.contains(&"P.jpg"));
        assert!(paths.contains(&"small.webm"));
    }

    #[test]
    fn test_videos_stripped_in_novid_mode() {
        let links = no_links();
        let mut ctx = context(&links);
        ctx.formats = FormatFlags::parse("novid");
        let mut doc = Html::parse_document(
            "<p><video><source src=\"https://u.org/a/v.webm\"/></video></p>",
        );
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);
        assert!(!dom::body_inner_html(&doc).contains("<video"));
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_figure_becomes_thumb() {
        let links = no_links();
        let ctx = context(&links);
        let mut doc = Html::parse_document(
            "<p><figure class=\"mw-halign-left\">\
             <img src=\"https://u.org/a/ab/F.jpg\" width=\"300\"/>\
             <figcaption>A <b>caption</b></figcaption></figure></p>",
        );
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);

        let html = dom::body_inner_html(&doc);
        assert!(html.contains("class=\"thumb tleft\""), "{html}");
        assert!(html.contains("width:302px;"));
        assert!(html.contains("thumbcaption"));
        assert!(html.contains("<b>caption</b>"));
        assert!(!html.contains("<figure"));
    }

    #[test]
    fn test_empty_figure_deleted() {
        let links = no_links();
        let ctx = context(&links);
        let mut doc =
            Html::parse_document("<p><figure><figcaption>only text</figcaption></figure></p>");
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);
        assert!(!dom::body_inner_html(&doc).contains("figure"));
    }

    #[test]
    fn test_centered_figure_wrapped_in_center() {
        let links = no_links();
        let ctx = context(&links);
        let mut doc = Html::parse_document(
            "<p><figure class=\"mw-halign-center\"><img src=\"https://u.org/a/ab/F.jpg\"/></figure></p>",
        );
        let mut tasks = Vec::new();
        treat_medias(&mut doc, &ctx, &mut tasks);
        let html = dom::body_inner_html(&doc);
        assert!(html.contains("<center>"), "{html}");
        assert!(html.contains("thumb tnone center"));
    }
}
