use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::document::{Node, NodeId, SlotId, TemplateDocument};

use super::builtins;
use super::context::RenderContext;
use super::element::{Element, RenderedDocument};

/// Nesting bound for node rendering. Deeper nodes render as nothing, as do
/// nodes that are already being rendered further up the same path.
pub const MAX_RENDER_DEPTH: usize = 64;

/// Renders one node type. Renderers that own slots call back into the registry.
pub trait NodeRenderer: Send + Sync {
    fn render(
        &self,
        node: &Node,
        document: &TemplateDocument,
        ctx: &RenderContext<'_>,
        registry: &RendererRegistry,
    ) -> Vec<Element>;
}

impl<F> NodeRenderer for F
where
    F: Fn(&Node, &TemplateDocument, &RenderContext<'_>, &RendererRegistry) -> Vec<Element>
        + Send
        + Sync,
{
    fn render(
        &self,
        node: &Node,
        document: &TemplateDocument,
        ctx: &RenderContext<'_>,
        registry: &RendererRegistry,
    ) -> Vec<Element> {
        self(node, document, ctx, registry)
    }
}

/// Node type tag to renderer.
#[derive(Clone, Default)]
pub struct RendererRegistry {
    renderers: HashMap<String, Arc<dyn NodeRenderer>>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, node_type: impl Into<String>, renderer: impl NodeRenderer + 'static) {
        self.renderers.insert(node_type.into(), Arc::new(renderer));
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.renderers.contains_key(node_type)
    }

    pub fn render_document(
        &self,
        document: &TemplateDocument,
        ctx: &RenderContext<'_>,
    ) -> RenderedDocument {
        let elements = self.render_node(&document.root, document, ctx);
        RenderedDocument::from_elements(elements, document.page_settings)
    }

    /// Render one node. Unknown ids, unregistered types and nodes nested deeper
    /// than [`MAX_RENDER_DEPTH`] produce no elements.
    pub fn render_node(
        &self,
        id: &NodeId,
        document: &TemplateDocument,
        ctx: &RenderContext<'_>,
    ) -> Vec<Element> {
        let Some(node) = document.node(id) else {
            debug!(target = "application::render", node_id = %id, "missing node; skipping");
            return Vec::new();
        };
        let Some(renderer) = self.renderers.get(&node.node_type) else {
            debug!(
                target = "application::render",
                node_id = %id,
                node_type = %node.node_type,
                "no renderer for node type; skipping"
            );
            return Vec::new();
        };

        let depth = ctx.path.borrow().len();
        if depth >= MAX_RENDER_DEPTH {
            debug!(
                target = "application::render",
                node_id = %id,
                depth,
                "render depth exceeded; skipping"
            );
            return Vec::new();
        }
        if ctx.path.borrow().contains(id) {
            debug!(
                target = "application::render",
                node_id = %id,
                depth,
                "node is its own ancestor; skipping"
            );
            return Vec::new();
        }
        ctx.path.borrow_mut().push(id.clone());
        let elements = renderer.render(node, document, ctx, self);
        ctx.path.borrow_mut().pop();
        elements
    }

    /// Concatenate the rendered children of a slot, in order.
    pub fn render_slot(
        &self,
        id: &SlotId,
        document: &TemplateDocument,
        ctx: &RenderContext<'_>,
    ) -> Vec<Element> {
        let Some(slot) = document.slot(id) else {
            debug!(target = "application::render", slot_id = %id, "missing slot; skipping");
            return Vec::new();
        };
        slot.children
            .iter()
            .flat_map(|child| self.render_node(child, document, ctx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::application::expression::{CompositeExpressionEvaluator, ExpressionLimits};
    use crate::domain::document::Slot;
    use crate::domain::theme::{ResolvedStyles, StyleMap};

    fn node(id: &str, node_type: &str, slots: &[&str]) -> (NodeId, Node) {
        (
            NodeId::from(id),
            Node {
                id: NodeId::from(id),
                node_type: node_type.to_string(),
                props: None,
                slots: slots.iter().map(|slot| SlotId::from(*slot)).collect(),
            },
        )
    }

    fn echo(
        node: &Node,
        _: &TemplateDocument,
        _: &RenderContext<'_>,
        _: &RendererRegistry,
    ) -> Vec<Element> {
        vec![Element::Paragraph {
            text: node.id.to_string(),
            styles: StyleMap::new(),
        }]
    }

    fn group(
        node: &Node,
        doc: &TemplateDocument,
        ctx: &RenderContext<'_>,
        registry: &RendererRegistry,
    ) -> Vec<Element> {
        node.slots
            .iter()
            .flat_map(|slot| registry.render_slot(slot, doc, ctx))
            .collect()
    }

    fn document() -> TemplateDocument {
        TemplateDocument {
            model_version: 1,
            root: NodeId::from("root"),
            nodes: HashMap::from([
                node("root", "group", &["body", "ghost"]),
                node("a", "echo", &[]),
                node("b", "echo", &[]),
                node("c", "echo", &[]),
                node("odd", "unknown", &[]),
            ]),
            slots: HashMap::from([(
                SlotId::from("body"),
                Slot {
                    id: SlotId::from("body"),
                    node_id: NodeId::from("root"),
                    name: "children".into(),
                    children: ["a", "odd", "b", "missing", "c"]
                        .into_iter()
                        .map(NodeId::from)
                        .collect(),
                },
            )]),
            theme_ref: Default::default(),
            document_styles: StyleMap::new(),
            page_settings: Default::default(),
        }
    }

    fn texts(elements: &[Element]) -> Vec<String> {
        elements
            .iter()
            .filter_map(|element| match element {
                Element::Paragraph { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn registry() -> RendererRegistry {
        let mut registry = RendererRegistry::new();
        registry.register("echo", echo);
        registry.register("group", group);
        registry
    }

    #[test]
    fn slots_render_children_in_order_and_skip_unknowns() {
        let styles = ResolvedStyles::default();
        let evaluator = CompositeExpressionEvaluator::with_limits(ExpressionLimits::default());
        let data = json!({});
        let ctx = RenderContext::new(&data, &styles, &evaluator);
        let doc = document();
        let registry = registry();

        let slot = registry.render_slot(&SlotId::from("body"), &doc, &ctx);
        let expected: Vec<String> = ["a", "b", "c"]
            .into_iter()
            .flat_map(|id| texts(&registry.render_node(&NodeId::from(id), &doc, &ctx)))
            .collect();
        assert_eq!(texts(&slot), expected);
        assert_eq!(expected, vec!["a", "b", "c"]);

        assert!(registry.render_node(&NodeId::from("odd"), &doc, &ctx).is_empty());
        assert!(registry.render_slot(&SlotId::from("ghost"), &doc, &ctx).is_empty());
        assert_eq!(texts(&registry.render_document(&doc, &ctx).body), expected);
    }

    fn render_root(doc: &TemplateDocument) -> (Vec<String>, bool) {
        let styles = ResolvedStyles::default();
        let evaluator = CompositeExpressionEvaluator::with_limits(ExpressionLimits::default());
        let data = json!({});
        let ctx = RenderContext::new(&data, &styles, &evaluator);
        let rendered = registry().render_node(&doc.root, doc, &ctx);
        let path_unwound = ctx.path.borrow().is_empty();
        (texts(&rendered), path_unwound)
    }

    #[test]
    fn cyclic_graphs_skip_nodes_already_on_the_path() {
        let mut doc = document();
        doc.slots
            .get_mut(&SlotId::from("body"))
            .unwrap()
            .children
            .push(NodeId::from("root"));

        assert_eq!(render_root(&doc), (vec!["a".into(), "b".into(), "c".into()], true));
    }

    #[test]
    fn fan_out_cycles_terminate() {
        let mut doc = document();
        let body = doc.slots.get_mut(&SlotId::from("body")).unwrap();
        body.children = ["root", "a", "root", "root"]
            .into_iter()
            .map(NodeId::from)
            .collect();

        assert_eq!(render_root(&doc), (vec!["a".to_string()], true));
    }

    #[test]
    fn deep_chains_stop_at_the_depth_bound() {
        let mut doc = document();
        let chain = MAX_RENDER_DEPTH + 10;
        for level in 0..chain {
            let id = format!("level-{level}");
            let slot = format!("level-{level}-body");
            let child = if level + 1 == chain {
                "a".to_string()
            } else {
                format!("level-{}", level + 1)
            };
            let (node_id, node) = node(&id, "group", &[slot.as_str()]);
            doc.nodes.insert(node_id, node);
            doc.slots.insert(
                SlotId::from(slot.as_str()),
                Slot {
                    id: SlotId::from(slot.as_str()),
                    node_id: NodeId::from(id.as_str()),
                    name: "children".into(),
                    children: vec![NodeId::from(child.as_str())],
                },
            );
        }
        doc.root = NodeId::from("level-0");

        let (rendered, path_unwound) = render_root(&doc);
        assert!(rendered.is_empty());
        assert!(path_unwound);

        doc.root = NodeId::from(format!("level-{}", chain - MAX_RENDER_DEPTH + 1).as_str());
        assert_eq!(render_root(&doc).0, vec!["a".to_string()]);
    }
}
