use crate::domain::document::PageSettings;
use crate::domain::theme::StyleMap;

/// Layout-independent output of the render engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Paragraph {
        text: String,
        styles: StyleMap,
    },
    Block {
        styles: StyleMap,
        children: Vec<Element>,
    },
    Columns {
        gap: f32,
        /// Relative widths, one per column.
        ratios: Vec<f32>,
        columns: Vec<Vec<Element>>,
    },
    Table {
        header_rows: usize,
        rows: Vec<Vec<Vec<Element>>>,
        styles: StyleMap,
    },
    PageBreak,
    /// Repeated at the top of every page.
    Header(Vec<Element>),
    /// Repeated at the bottom of every page.
    Footer(Vec<Element>),
}

/// A rendered template: body flow plus the running header and footer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedDocument {
    pub body: Vec<Element>,
    pub header: Vec<Element>,
    pub footer: Vec<Element>,
    pub page_settings: PageSettings,
}

impl RenderedDocument {
    /// Split headers and footers out of `elements`, including those nested in blocks.
    pub fn from_elements(elements: Vec<Element>, page_settings: PageSettings) -> Self {
        let mut document = Self {
            page_settings,
            ..Self::default()
        };
        document.body = document.extract(elements);
        document
    }

    fn extract(&mut self, elements: Vec<Element>) -> Vec<Element> {
        let mut body = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Element::Header(children) => self.header.extend(children),
                Element::Footer(children) => self.footer.extend(children),
                Element::Block { styles, children } => {
                    let children = self.extract(children);
                    body.push(Element::Block { styles, children });
                }
                other => body.push(other),
            }
        }
        body
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && self.header.is_empty() && self.footer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Element {
        Element::Paragraph {
            text: value.to_string(),
            styles: StyleMap::new(),
        }
    }

    #[test]
    fn running_content_is_lifted_out_of_the_flow() {
        let elements = vec![
            Element::Block {
                styles: StyleMap::new(),
                children: vec![Element::Header(vec![text("head")]), text("body")],
            },
            Element::Footer(vec![text("foot")]),
        ];
        let document = RenderedDocument::from_elements(elements, PageSettings::default());

        assert_eq!(document.header, vec![text("head")]);
        assert_eq!(document.footer, vec![text("foot")]);
        assert_eq!(
            document.body,
            vec![Element::Block {
                styles: StyleMap::new(),
                children: vec![text("body")],
            }]
        );
    }
}
