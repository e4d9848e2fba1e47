use std::cell::RefCell;

use serde_json::{Map, Value};

use crate::application::expression::CompositeExpressionEvaluator;
use crate::domain::document::{Node, NodeId};
use crate::domain::expression::Expression;
use crate::domain::theme::{ResolvedStyles, StyleMap};
use crate::domain::types::ExpressionLanguage;

/// Per-render state handed to every renderer.
///
/// Owned by a single render call; loop renderers derive child contexts with
/// [`RenderContext::with_scope`].
pub struct RenderContext<'a> {
    data: &'a Value,
    scope: Map<String, Value>,
    styles: &'a ResolvedStyles,
    evaluator: &'a CompositeExpressionEvaluator,
    /// Ids of the nodes currently being rendered, outermost first.
    pub(super) path: RefCell<Vec<NodeId>>,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        data: &'a Value,
        styles: &'a ResolvedStyles,
        evaluator: &'a CompositeExpressionEvaluator,
    ) -> Self {
        Self {
            data,
            scope: Map::new(),
            styles,
            evaluator,
            path: RefCell::new(Vec::new()),
        }
    }

    /// A context whose loop scope is the current one plus `bindings`.
    pub fn with_scope(&self, bindings: Map<String, Value>) -> RenderContext<'a> {
        let mut scope = self.scope.clone();
        scope.extend(bindings);
        RenderContext {
            data: self.data,
            scope,
            styles: self.styles,
            evaluator: self.evaluator,
            path: RefCell::new(self.path.borrow().clone()),
        }
    }

    pub fn data(&self) -> &Value {
        self.data
    }

    pub fn scope(&self) -> &Map<String, Value> {
        &self.scope
    }

    pub fn styles(&self) -> &ResolvedStyles {
        self.styles
    }

    fn loop_ctx(&self) -> Option<&Map<String, Value>> {
        (!self.scope.is_empty()).then_some(&self.scope)
    }

    pub fn evaluate(&self, expression: &Expression) -> Value {
        self.evaluator
            .evaluate(expression, self.data, self.loop_ctx())
    }

    pub fn condition(&self, expression: &Expression) -> bool {
        self.evaluator
            .evaluate_condition(expression, self.data, self.loop_ctx())
    }

    pub fn iterable(&self, expression: &Expression) -> Vec<Value> {
        self.evaluator
            .evaluate_iterable(expression, self.data, self.loop_ctx())
    }

    pub fn template(&self, text: &str, language: ExpressionLanguage) -> String {
        self.evaluator
            .process_template(text, language, self.data, self.loop_ctx())
    }

    /// Document styles, then the node's preset (when it applies to the node's
    /// type), then the node's inline styles.
    pub fn node_styles(&self, node: &Node) -> StyleMap {
        let mut styles = self.styles.document_styles.clone();
        if let Some(preset) = node
            .style_preset()
            .and_then(|name| self.styles.preset_for(name, &node.node_type))
        {
            styles.extend(preset.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        styles.extend(node.inline_styles());
        styles
    }
}
