//! Mutation helpers over a parsed document.
//!
//! `scraper` gives us parsing and selector matching; mutation happens
//! through the underlying tree by node id. Every pass snapshots the ids
//! it will touch before mutating, so live node lists are never iterated.

use ego_tree::NodeId;
use html5ever::{namespace_url, ns, Attribute, LocalName, QualName};
use scraper::node::Element;
use scraper::{Html, Node, Selector};

fn qual(name: &str) -> QualName {
    QualName::new(None, ns!(), LocalName::from(name))
}

/// Snapshot the ids matching `selector`, in document order.
pub fn select_ids(doc: &Html, selector: &Selector) -> Vec<NodeId> {
    doc.select(selector).map(|el| el.id()).collect()
}

/// Lower-case tag name of an element node.
pub fn tag_name(doc: &Html, id: NodeId) -> Option<String> {
    doc.tree
        .get(id)
        .and_then(|n| n.value().as_element().map(|el| el.name().to_lowercase()))
}

pub fn get_attr(doc: &Html, id: NodeId, name: &str) -> Option<String> {
    doc.tree
        .get(id)
        .and_then(|n| n.value().as_element().and_then(|el| el.attr(name)))
        .map(|v| v.to_string())
}

/// Rebuild the element with `f` applied to its attribute list.
///
/// Rebuilding (rather than editing in place) also resets the cached
/// id/class lookups used by selector matching.
fn rebuild_attrs(doc: &mut Html, id: NodeId, f: impl FnOnce(&mut Vec<Attribute>)) {
    let Some(mut node) = doc.tree.get_mut(id) else {
        return;
    };
    let rebuilt = match node.value() {
        Node::Element(el) => {
            let mut attrs: Vec<Attribute> = el
                .attrs()
                .map(|(name, value)| Attribute {
                    name: qual(name),
                    value: value.into(),
                })
                .collect();
            f(&mut attrs);
            Some(Element::new(el.name.clone(), attrs))
        }
        _ => None,
    };
    if let Some(element) = rebuilt {
        *node.value() = Node::Element(element);
    }
}

pub fn set_attr(doc: &mut Html, id: NodeId, name: &str, value: &str) {
    let target = qual(name);
    rebuild_attrs(doc, id, |attrs| {
        attrs.retain(|a| a.name != target);
        attrs.push(Attribute {
            name: target.clone(),
            value: value.into(),
        });
    });
}

pub fn remove_attr(doc: &mut Html, id: NodeId, name: &str) {
    let target = qual(name);
    rebuild_attrs(doc, id, |attrs| attrs.retain(|a| a.name != target));
}

/// Remove attributes selected by a predicate on the attribute name.
pub fn remove_attrs_where(doc: &mut Html, id: NodeId, keep: impl Fn(&str, &str) -> bool) {
    rebuild_attrs(doc, id, |attrs| {
        attrs.retain(|a| keep(&a.name.local, &a.value));
    });
}

/// Detach a node (and its subtree) from the document.
pub fn detach(doc: &mut Html, id: NodeId) {
    if let Some(mut node) = doc.tree.get_mut(id) {
        node.detach();
    }
}

/// Replace a node with its children ("unwrap").
pub fn unwrap_node(doc: &mut Html, id: NodeId) {
    let children = child_ids(doc, id);
    for child in children {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.insert_id_before(child);
        }
    }
    detach(doc, id);
}

/// Create a detached element; attach it with the insertion helpers.
pub fn create_element(doc: &mut Html, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
    let attributes = attrs
        .iter()
        .map(|(name, value)| Attribute {
            name: qual(name),
            value: (*value).into(),
        })
        .collect();
    let element = Element::new(qual(tag), attributes);
    doc.tree.orphan(Node::Element(element)).id()
}

/// Insert `wrapper` in the position of `id` and move `id` inside it.
pub fn wrap_node(doc: &mut Html, id: NodeId, wrapper: NodeId) {
    if let Some(mut node) = doc.tree.get_mut(id) {
        node.insert_id_before(wrapper);
    }
    if let Some(mut node) = doc.tree.get_mut(wrapper) {
        node.append_id(id);
    }
}

/// Append a child node by id.
pub fn append_child(doc: &mut Html, parent: NodeId, child: NodeId) {
    if let Some(mut node) = doc.tree.get_mut(parent) {
        node.append_id(child);
    }
}

/// Deep-copy the subtree rooted at `src` and append it under `dest`.
pub fn deep_copy(doc: &mut Html, src: NodeId, dest: NodeId) {
    let Some(value) = doc.tree.get(src).map(|n| n.value().clone()) else {
        return;
    };
    let Some(new_id) = doc.tree.get_mut(dest).map(|mut n| n.append(value).id()) else {
        return;
    };
    for child in child_ids(doc, src) {
        deep_copy(doc, child, new_id);
    }
}

pub fn parent_id(doc: &Html, id: NodeId) -> Option<NodeId> {
    doc.tree.get(id).and_then(|n| n.parent()).map(|p| p.id())
}

pub fn child_ids(doc: &Html, id: NodeId) -> Vec<NodeId> {
    doc.tree
        .get(id)
        .map(|n| n.children().map(|c| c.id()).collect())
        .unwrap_or_default()
}

/// Element children only (skipping text and comments).
pub fn child_element_ids(doc: &Html, id: NodeId) -> Vec<NodeId> {
    doc.tree
        .get(id)
        .map(|n| {
            n.children()
                .filter(|c| c.value().is_element())
                .map(|c| c.id())
                .collect()
        })
        .unwrap_or_default()
}

/// The next sibling that is an element.
pub fn next_element_sibling(doc: &Html, id: NodeId) -> Option<NodeId> {
    let mut current = doc.tree.get(id)?.next_sibling();
    while let Some(node) = current {
        if node.value().is_element() {
            return Some(node.id());
        }
        current = node.next_sibling();
    }
    None
}

/// Concatenated text of the subtree.
pub fn inner_text(doc: &Html, id: NodeId) -> String {
    let Some(node) = doc.tree.get(id) else {
        return String::new();
    };
    let mut out = String::new();
    for descendant in node.descendants() {
        if let Node::Text(text) = descendant.value() {
            out.push_str(text);
        }
    }
    out
}

/// Whether the subtree contains an element with one of the given names.
pub fn has_descendant_element(doc: &Html, id: NodeId, names: &[&str]) -> bool {
    let Some(node) = doc.tree.get(id) else {
        return false;
    };
    node.descendants().skip(1).any(|d| {
        d.value()
            .as_element()
            .map(|el| names.contains(&el.name()))
            .unwrap_or(false)
    })
}

/// The element's classes, read from the current class attribute.
pub fn classes(doc: &Html, id: NodeId) -> Vec<String> {
    get_attr(doc, id, "class")
        .map(|c| c.split_whitespace().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

pub fn has_class(doc: &Html, id: NodeId, class: &str) -> bool {
    classes(doc, id).iter().any(|c| c == class)
}

/// Add a class, preserving existing ones.
pub fn add_class(doc: &mut Html, id: NodeId, class: &str) {
    let mut current = classes(doc, id);
    if current.iter().any(|c| c == class) {
        return;
    }
    current.push(class.to_string());
    set_attr(doc, id, "class", &current.join(" "));
}

/// Whether a node still belongs to the document tree.
pub fn is_attached(doc: &Html, id: NodeId) -> bool {
    let Some(node) = doc.tree.get(id) else {
        return false;
    };
    let root = doc.tree.root().id();
    let mut current = Some(node);
    while let Some(n) = current {
        if n.id() == root {
            return true;
        }
        current = n.parent();
    }
    false
}

/// Serialize the document body's inner HTML; falls back to the full
/// document when no body element exists.
pub fn body_inner_html(doc: &Html) -> String {
    let body = Selector::parse("body").expect("static selector");
    match doc.select(&body).next() {
        Some(el) => el.inner_html(),
        None => doc.root_element().html(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(html: &str) -> Html {
        Html::parse_document(html)
    }

    fn find(doc: &Html, sel: &str) -> NodeId {
        let selector = Selector::parse(sel).expect("selector");
        doc.select(&selector).next().expect("match").id()
    }

    #[test]
    fn test_set_and_remove_attr() {
        let mut doc = parse("<p><a href=\"x\">t</a></p>");
        let a = find(&doc, "a");
        set_attr(&mut doc, a, "href", "y");
        assert_eq!(get_attr(&doc, a, "href").as_deref(), Some("y"));
        remove_attr(&mut doc, a, "href");
        assert_eq!(get_attr(&doc, a, "href"), None);
    }

    #[test]
    fn test_class_mutation_is_visible_to_selectors() {
        let mut doc = parse("<p><a href=\"x\">t</a></p>");
        let a = find(&doc, "a");
        add_class(&mut doc, a, "external");
        let selector = Selector::parse("a.external").expect("selector");
        assert_eq!(doc.select(&selector).count(), 1);
    }

    #[test]
    fn test_unwrap_promotes_children() {
        let mut doc = parse("<p><a href=\"x\"><img src=\"i.png\"/>text</a></p>");
        let a = find(&doc, "a");
        unwrap_node(&mut doc, a);
        assert_eq!(body_inner_html(&doc), "<p><img src=\"i.png\">text</p>");
    }

    #[test]
    fn test_wrap_node() {
        let mut doc = parse("<p><img src=\"i.png\"/></p>");
        let img = find(&doc, "img");
        let wrapper = create_element(&mut doc, "div", &[("class", "thumb")]);
        wrap_node(&mut doc, img, wrapper);
        assert_eq!(
            body_inner_html(&doc),
            "<p><div class=\"thumb\"><img src=\"i.png\"></div></p>"
        );
    }

    #[test]
    fn test_deep_copy() {
        let mut doc = parse("<p><span id=\"src\"><b>bold</b></span><div id=\"dest\"></div></p>");
        let src = find(&doc, "#src");
        let dest = find(&doc, "#dest");
        deep_copy(&mut doc, src, dest);
        assert!(body_inner_html(&doc).contains("<div id=\"dest\"><span id=\"src\"><b>bold</b></span></div>"));
    }

    #[test]
    fn test_next_element_sibling_skips_text() {
        let doc = parse("<div><h3>a</h3>  \n <h3>b</h3></div>");
        let selector = Selector::parse("h3").expect("selector");
        let ids: Vec<_> = doc.select(&selector).map(|e| e.id()).collect();
        assert_eq!(next_element_sibling(&doc, ids[0]), Some(ids[1]));
        assert_eq!(next_element_sibling(&doc, ids[1]), None);
    }

    #[test]
    fn test_detach_and_is_attached() {
        let mut doc = parse("<p><span>x</span></p>");
        let span = find(&doc, "span");
        assert!(is_attached(&doc, span));
        detach(&mut doc, span);
        assert!(!is_attached(&doc, span));
        assert_eq!(body_inner_html(&doc), "<p></p>");
    }

    #[test]
    fn test_has_descendant_element() {
        let doc = parse("<div class=\"box\"><p><img src=\"x\"/></p></div>");
        let div = find(&doc, "div.box");
        assert!(has_descendant_element(&doc, div, &["img"]));
        assert!(!has_descendant_element(&doc, div, &["video", "audio"]));
    }

    #[test]
    fn test_inner_text() {
        let doc = parse("<div><p>a<b>b</b></p>c</div>");
        let div = find(&doc, "div");
        assert_eq!(inner_text(&doc, div), "abc");
    }
}
