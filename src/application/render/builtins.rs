//! Renderers for the built-in node types.

use serde_json::{Map, Value};

use crate::domain::document::{Node, Slot, TemplateDocument};
use crate::domain::types::ExpressionLanguage;

use super::context::RenderContext;
use super::element::Element;
use super::registry::RendererRegistry;

pub const TEXT: &str = "text";
pub const CONTAINER: &str = "container";
pub const CONDITIONAL: &str = "conditional";
pub const LOOP: &str = "loop";
pub const COLUMNS: &str = "columns";
pub const TABLE: &str = "table";
pub const PAGE_BREAK: &str = "pagebreak";
pub const PAGE_HEADER: &str = "pageheader";
pub const PAGE_FOOTER: &str = "pagefooter";

const DEFAULT_ITEM_ALIAS: &str = "item";
const DEFAULT_COLUMN_GAP: f32 = 12.0;

pub(super) fn register_all(registry: &mut RendererRegistry) {
    registry.register(TEXT, text);
    registry.register(CONTAINER, container);
    registry.register(CONDITIONAL, conditional);
    registry.register(LOOP, repeat);
    registry.register(COLUMNS, columns);
    registry.register(TABLE, table);
    registry.register(PAGE_BREAK, page_break);
    registry.register(PAGE_HEADER, page_header);
    registry.register(PAGE_FOOTER, page_footer);
}

fn text(
    node: &Node,
    _: &TemplateDocument,
    ctx: &RenderContext<'_>,
    _: &RendererRegistry,
) -> Vec<Element> {
    let content = node.prop_str("content").unwrap_or_default();
    let language = node
        .prop("language")
        .and_then(|value| serde_json::from_value::<ExpressionLanguage>(value.clone()).ok())
        .unwrap_or_default();
    vec![Element::Paragraph {
        text: ctx.template(content, language),
        styles: ctx.node_styles(node),
    }]
}

fn container(
    node: &Node,
    document: &TemplateDocument,
    ctx: &RenderContext<'_>,
    registry: &RendererRegistry,
) -> Vec<Element> {
    vec![Element::Block {
        styles: ctx.node_styles(node),
        children: render_owned_slots(node, document, ctx, registry),
    }]
}

fn conditional(
    node: &Node,
    document: &TemplateDocument,
    ctx: &RenderContext<'_>,
    registry: &RendererRegistry,
) -> Vec<Element> {
    let holds = node
        .prop_expression("condition")
        .is_some_and(|condition| ctx.condition(&condition));
    if holds == node.prop_bool("inverse") {
        return Vec::new();
    }
    render_owned_slots(node, document, ctx, registry)
}

/// Render the `body` slot once per item, binding the item alias, the index
/// (as `$index` and, when configured, the index alias), `$first` and `$last`.
fn repeat(
    node: &Node,
    document: &TemplateDocument,
    ctx: &RenderContext<'_>,
    registry: &RendererRegistry,
) -> Vec<Element> {
    let Some(expression) = node.prop_expression("expression") else {
        return Vec::new();
    };
    let Some(body) = body_slot(node, document) else {
        return Vec::new();
    };
    let items = ctx.iterable(&expression);
    let alias = node.prop_str("itemAlias").unwrap_or(DEFAULT_ITEM_ALIAS);
    let index_alias = node.prop_str("indexAlias");
    let last = items.len().saturating_sub(1);

    let mut out = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let mut bindings = Map::new();
        bindings.insert(alias.to_string(), item);
        bindings.insert("$index".to_string(), Value::from(index));
        if let Some(index_alias) = index_alias {
            bindings.insert(index_alias.to_string(), Value::from(index));
        }
        bindings.insert("$first".to_string(), Value::Bool(index == 0));
        bindings.insert("$last".to_string(), Value::Bool(index == last));

        let scoped = ctx.with_scope(bindings);
        out.extend(registry.render_slot(&body.id, document, &scoped));
    }
    out
}

/// One owned slot per column.
fn columns(
    node: &Node,
    document: &TemplateDocument,
    ctx: &RenderContext<'_>,
    registry: &RendererRegistry,
) -> Vec<Element> {
    let columns: Vec<Vec<Element>> = node
        .slots
        .iter()
        .map(|slot| registry.render_slot(slot, document, ctx))
        .collect();
    if columns.is_empty() {
        return Vec::new();
    }

    let declared: Vec<f32> = match node.prop("ratios") {
        Some(Value::Array(ratios)) => ratios
            .iter()
            .filter_map(Value::as_f64)
            .map(|ratio| ratio as f32)
            .collect(),
        _ => Vec::new(),
    };
    let ratios = if declared.len() == columns.len() && declared.iter().all(|r| *r > 0.0) {
        declared
    } else {
        vec![1.0; columns.len()]
    };

    vec![Element::Columns {
        gap: node
            .prop_f64("gap")
            .map(|gap| gap.max(0.0) as f32)
            .unwrap_or(DEFAULT_COLUMN_GAP),
        ratios,
        columns,
    }]
}

/// Owned slots are cells in row-major order; `columns` sets the row width.
fn table(
    node: &Node,
    document: &TemplateDocument,
    ctx: &RenderContext<'_>,
    registry: &RendererRegistry,
) -> Vec<Element> {
    let cells: Vec<Vec<Element>> = node
        .slots
        .iter()
        .map(|slot| registry.render_slot(slot, document, ctx))
        .collect();
    if cells.is_empty() {
        return Vec::new();
    }

    let width = node
        .prop_u64("columns")
        .and_then(|columns| usize::try_from(columns).ok())
        .filter(|columns| *columns > 0)
        .unwrap_or(cells.len());
    let rows: Vec<Vec<Vec<Element>>> = cells
        .chunks(width)
        .map(|row| {
            let mut row = row.to_vec();
            row.resize(width, Vec::new());
            row
        })
        .collect();
    let header_rows = node
        .prop_u64("headerRows")
        .and_then(|rows| usize::try_from(rows).ok())
        .unwrap_or(0)
        .min(rows.len());

    vec![Element::Table {
        header_rows,
        rows,
        styles: ctx.node_styles(node),
    }]
}

fn page_break(
    _: &Node,
    _: &TemplateDocument,
    _: &RenderContext<'_>,
    _: &RendererRegistry,
) -> Vec<Element> {
    vec![Element::PageBreak]
}

fn page_header(
    node: &Node,
    document: &TemplateDocument,
    ctx: &RenderContext<'_>,
    registry: &RendererRegistry,
) -> Vec<Element> {
    vec![Element::Header(running_content(node, document, ctx, registry))]
}

fn page_footer(
    node: &Node,
    document: &TemplateDocument,
    ctx: &RenderContext<'_>,
    registry: &RendererRegistry,
) -> Vec<Element> {
    vec![Element::Footer(running_content(node, document, ctx, registry))]
}

fn running_content(
    node: &Node,
    document: &TemplateDocument,
    ctx: &RenderContext<'_>,
    registry: &RendererRegistry,
) -> Vec<Element> {
    match body_slot(node, document) {
        Some(body) => registry.render_slot(&body.id, document, ctx),
        None => Vec::new(),
    }
}

fn render_owned_slots(
    node: &Node,
    document: &TemplateDocument,
    ctx: &RenderContext<'_>,
    registry: &RendererRegistry,
) -> Vec<Element> {
    node.slots
        .iter()
        .flat_map(|slot| registry.render_slot(slot, document, ctx))
        .collect()
}

/// The slot named `body`, else the node's first slot.
fn body_slot<'d>(node: &Node, document: &'d TemplateDocument) -> Option<&'d Slot> {
    document
        .named_slot(node, "body")
        .or_else(|| node.slots.first().and_then(|id| document.slot(id)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::expression::{CompositeExpressionEvaluator, ExpressionLimits};
    use crate::domain::theme::ResolvedStyles;

    fn render(document: serde_json::Value, data: serde_json::Value) -> Vec<Element> {
        let document: TemplateDocument = serde_json::from_value(document).unwrap();
        let styles = ResolvedStyles::default();
        let evaluator = CompositeExpressionEvaluator::with_limits(ExpressionLimits::default());
        let ctx = RenderContext::new(&data, &styles, &evaluator);
        RendererRegistry::with_builtins().render_node(&document.root, &document, &ctx)
    }

    fn texts(elements: &[Element]) -> Vec<String> {
        let mut out = Vec::new();
        for element in elements {
            match element {
                Element::Paragraph { text, .. } => out.push(text.clone()),
                Element::Block { children, .. }
                | Element::Header(children)
                | Element::Footer(children) => out.extend(texts(children)),
                Element::Columns { columns, .. } => {
                    for column in columns {
                        out.extend(texts(column));
                    }
                }
                Element::Table { rows, .. } => {
                    for cell in rows.iter().flatten() {
                        out.extend(texts(cell));
                    }
                }
                Element::PageBreak => out.push("<break>".into()),
            }
        }
        out
    }

    #[test]
    fn loops_bind_item_index_and_edges() {
        let elements = render(
            json!({
                "root": "list",
                "nodes": {
                    "list": {
                        "id": "list", "type": "loop", "slots": ["list-body"],
                        "props": {"expression": "lines", "itemAlias": "line", "indexAlias": "i"}
                    },
                    "row": {
                        "id": "row", "type": "text",
                        "props": {"content": "{{i}}:{{line.name}}:{{$first}}:{{$last}}"}
                    }
                },
                "slots": {
                    "list-body": {"id": "list-body", "nodeId": "list", "name": "body", "children": ["row"]}
                }
            }),
            json!({"lines": [{"name": "a"}, {"name": "b"}, {"name": "c"}]}),
        );
        assert_eq!(
            texts(&elements),
            vec!["0:a:true:false", "1:b:false:false", "2:c:false:true"]
        );
    }

    #[test]
    fn loops_over_non_arrays_render_nothing() {
        let elements = render(
            json!({
                "root": "list",
                "nodes": {
                    "list": {"id": "list", "type": "loop", "slots": ["b"], "props": {"expression": "missing"}},
                    "row": {"id": "row", "type": "text", "props": {"content": "x"}}
                },
                "slots": {"b": {"id": "b", "nodeId": "list", "name": "body", "children": ["row"]}}
            }),
            json!({"missing": "scalar"}),
        );
        assert!(elements.is_empty());
    }

    #[test]
    fn conditionals_honour_inverse() {
        let document = |inverse: bool| {
            json!({
                "root": "when",
                "nodes": {
                    "when": {
                        "id": "when", "type": "conditional", "slots": ["w"],
                        "props": {"condition": {"raw": "$count(items) > 0", "language": "query"}, "inverse": inverse}
                    },
                    "msg": {"id": "msg", "type": "text", "props": {"content": "has items"}}
                },
                "slots": {"w": {"id": "w", "nodeId": "when", "name": "children", "children": ["msg"]}}
            })
        };
        let data = json!({"items": [1]});
        assert_eq!(texts(&render(document(false), data.clone())), vec!["has items"]);
        assert!(render(document(true), data).is_empty());
    }

    #[test]
    fn tables_split_cells_into_rows() {
        let elements = render(
            json!({
                "root": "t",
                "nodes": {
                    "t": {"id": "t", "type": "table", "slots": ["c1", "c2", "c3"], "props": {"columns": 2, "headerRows": 5}},
                    "x": {"id": "x", "type": "text", "props": {"content": "x"}}
                },
                "slots": {
                    "c1": {"id": "c1", "nodeId": "t", "name": "cell", "children": ["x"]},
                    "c2": {"id": "c2", "nodeId": "t", "name": "cell", "children": ["x"]},
                    "c3": {"id": "c3", "nodeId": "t", "name": "cell", "children": ["x"]}
                }
            }),
            json!({}),
        );
        let [Element::Table { header_rows, rows, .. }] = elements.as_slice() else {
            panic!("expected a single table, got {elements:?}");
        };
        assert_eq!(*header_rows, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].len(), 2);
        assert!(rows[1][1].is_empty());
    }

    #[test]
    fn columns_fall_back_to_equal_ratios() {
        let elements = render(
            json!({
                "root": "cols",
                "nodes": {
                    "cols": {"id": "cols", "type": "columns", "slots": ["l", "r"], "props": {"ratios": [2]}},
                    "brk": {"id": "brk", "type": "pagebreak"}
                },
                "slots": {
                    "l": {"id": "l", "nodeId": "cols", "name": "left", "children": ["brk"]},
                    "r": {"id": "r", "nodeId": "cols", "name": "right", "children": []}
                }
            }),
            json!({}),
        );
        let [Element::Columns { ratios, gap, columns }] = elements.as_slice() else {
            panic!("expected columns, got {elements:?}");
        };
        assert_eq!(ratios, &vec![1.0, 1.0]);
        assert_eq!(*gap, DEFAULT_COLUMN_GAP);
        assert_eq!(columns[0], vec![Element::PageBreak]);
    }

    #[test]
    fn text_language_prop_selects_the_evaluator() {
        let elements = render(
            json!({
                "root": "t",
                "nodes": {
                    "t": {"id": "t", "type": "text", "props": {"content": "Total: {{$sum(items)}}", "language": "query"}}
                }
            }),
            json!({"items": [1, 2, 3]}),
        );
        assert_eq!(texts(&elements), vec!["Total: 6"]);
    }
}
