//! Structural cleanup: the final pass before templating.

use scraper::{Html, Selector};

use super::dom;
use crate::config::{DomLists, FormatFlags};

pub struct CleanupContext<'a> {
    pub formats: FormatFlags,
    pub lists: &'a DomLists,
    pub keep_empty_sections: bool,
}

pub fn cleanup(doc: &mut Html, ctx: &CleanupContext<'_>) {
    remove_unsupported_tags(doc, ctx);
    remove_empty_inline_nodes(doc);
    remove_empty_galleries(doc);
    apply_class_blacklists(doc, ctx);
    convert_reference_spans(doc);
    apply_id_blacklist(doc, ctx);
    force_display(doc, ctx);
    if !ctx.keep_empty_sections {
        remove_empty_sections(doc);
    }
    scrub_attributes(doc, ctx);
}

fn remove_unsupported_tags(doc: &mut Html, ctx: &CleanupContext<'_>) {
    let selector = Selector::parse("link, input").expect("static selector");
    for id in dom::select_ids(doc, &selector) {
        dom::detach(doc, id);
    }
    if ctx.formats.strips_pictures() {
        let map = Selector::parse("map").expect("static selector");
        for id in dom::select_ids(doc, &map) {
            dom::detach(doc, id);
        }
    }
}

fn remove_empty_inline_nodes(doc: &mut Html) {
    let selector = Selector::parse("li, span").expect("static selector");
    for id in dom::select_ids(doc, &selector) {
        if !dom::is_attached(doc, id) {
            continue;
        }
        let has_children = !dom::child_element_ids(doc, id).is_empty();
        if !has_children && dom::inner_text(doc, id).trim().is_empty() {
            dom::detach(doc, id);
        }
    }
}

fn remove_empty_galleries(doc: &mut Html) {
    let boxes = Selector::parse(".gallerybox").expect("static selector");
    for id in dom::select_ids(doc, &boxes) {
        if !dom::has_descendant_element(doc, id, &["img", "audio", "video"]) {
            dom::detach(doc, id);
        }
    }
    let galleries = Selector::parse(".gallery").expect("static selector");
    for id in dom::select_ids(doc, &galleries) {
        if !dom::is_attached(doc, id) {
            continue;
        }
        // Boxes may sit below an intermediate wrapper.
        let mut has_box = false;
        let mut stack = dom::child_ids(doc, id);
        while let Some(node) = stack.pop() {
            if dom::has_class(doc, node, "gallerybox") {
                has_box = true;
                break;
            }
            stack.extend(dom::child_ids(doc, node));
        }
        if !has_box {
            dom::detach(doc, id);
        }
    }
}

fn apply_class_blacklists(doc: &mut Html, ctx: &CleanupContext<'_>) {
    for class in &ctx.lists.css_class_blacklist {
        let Ok(selector) = Selector::parse(&format!(".{class}")) else {
            continue;
        };
        for id in dom::select_ids(doc, &selector) {
            dom::detach(doc, id);
        }
    }
    for class in &ctx.lists.css_class_blacklist_if_no_link {
        let Ok(selector) = Selector::parse(&format!(".{class}")) else {
            continue;
        };
        for id in dom::select_ids(doc, &selector) {
            if dom::is_attached(doc, id) && !dom::has_descendant_element(doc, id, &["a"]) {
                dom::detach(doc, id);
            }
        }
    }
    if ctx.formats.nodet {
        for class in &ctx.lists.css_class_details_blacklist {
            let Ok(selector) = Selector::parse(&format!(".{class}")) else {
                continue;
            };
            for id in dom::select_ids(doc, &selector) {
                dom::detach(doc, id);
            }
        }
    }
}

/// `<span rel="dc:references">` becomes `<sup>`, keeping id and content;
/// empty ones are dropped.
fn convert_reference_spans(doc: &mut Html) {
    let selector = Selector::parse("span[rel=\"dc:references\"]").expect("static selector");
    for id in dom::select_ids(doc, &selector) {
        if !dom::is_attached(doc, id) {
            continue;
        }
        if dom::inner_text(doc, id).trim().is_empty()
            && dom::child_element_ids(doc, id).is_empty()
        {
            dom::detach(doc, id);
            continue;
        }
        let preserved_id = dom::get_attr(doc, id, "id");
        let sup = match preserved_id.as_deref() {
            Some(value) => dom::create_element(doc, "sup", &[("id", value)]),
            None => dom::create_element(doc, "sup", &[]),
        };
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.insert_id_before(sup);
        }
        for child in dom::child_ids(doc, id) {
            dom::append_child(doc, sup, child);
        }
        dom::detach(doc, id);
    }
}

fn apply_id_blacklist(doc: &mut Html, ctx: &CleanupContext<'_>) {
    for element_id in &ctx.lists.id_blacklist {
        let Ok(selector) = Selector::parse(&format!("#{element_id}")) else {
            continue;
        };
        for id in dom::select_ids(doc, &selector) {
            dom::detach(doc, id);
        }
    }
}

/// Remove inline `display:none` from classes that must stay visible.
fn force_display(doc: &mut Html, ctx: &CleanupContext<'_>) {
    for class in &ctx.lists.css_class_display_list {
        let Ok(selector) = Selector::parse(&format!(".{class}")) else {
            continue;
        };
        for id in dom::select_ids(doc, &selector) {
            let Some(style) = dom::get_attr(doc, id, "style") else {
                continue;
            };
            let filtered: String = style
                .split(';')
                .filter(|rule| !rule.replace(' ', "").contains("display:none"))
                .collect::<Vec<_>>()
                .join(";");
            if filtered.trim().is_empty() {
                dom::remove_attr(doc, id, "style");
            } else {
                dom::set_attr(doc, id, "style", &filtered);
            }
        }
    }
}

/// Drop headings that introduce nothing: no following sibling at all, or
/// an immediately following heading of equal or higher rank. Walks levels
/// 5 down to 1 so emptied parents collapse too.
fn remove_empty_sections(doc: &mut Html) {
    for level in (1..=5u8).rev() {
        let selector = Selector::parse(&format!("h{level}")).expect("static selector");
        for id in dom::select_ids(doc, &selector) {
            if !dom::is_attached(doc, id) {
                continue;
            }
            if let Some(parent) = dom::parent_id(doc, id) {
                if dom::tag_name(doc, parent).as_deref() == Some("summary") {
                    continue;
                }
            }
            match dom::next_element_sibling(doc, id) {
                None => dom::detach(doc, id),
                Some(next) => {
                    if let Some(next_level) = heading_level(doc, next) {
                        if next_level <= level {
                            dom::detach(doc, id);
                        }
                    }
                }
            }
        }
    }
}

fn heading_level(doc: &Html, id: ego_tree::NodeId) -> Option<u8> {
    let name = dom::tag_name(doc, id)?;
    match name.as_str() {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Final attribute scrub over every element.
fn scrub_attributes(doc: &mut Html, ctx: &CleanupContext<'_>) {
    let selector = Selector::parse("*").expect("static selector");
    let call_blacklist = &ctx.lists.css_class_call_blacklist;
    for id in dom::select_ids(doc, &selector) {
        dom::remove_attrs_where(doc, id, |name, value| {
            !matches!(name, "data-parsoid" | "typeof" | "about" | "data-mw")
                && !(name == "rel" && value.starts_with("mw:"))
        });
        let classes = dom::classes(doc, id);
        if classes
            .iter()
            .any(|c| call_blacklist.iter().any(|b| c.contains(b.as_str())))
        {
            let kept: Vec<String> = classes
                .into_iter()
                .filter(|c| !call_blacklist.iter().any(|b| c.contains(b.as_str())))
                .collect();
            if kept.is_empty() {
                dom::remove_attr(doc, id, "class");
            } else {
                dom::set_attr(doc, id, "class", &kept.join(" "));
            }
        }
    }
}
