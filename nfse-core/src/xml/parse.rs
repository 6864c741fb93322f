//! Reading XML returned by the webservice.
use super::{Element, Node as TreeNode};
use libxml::{
    parser::Parser,
    tree::{Document, Node, NodeType},
    xpath,
};
use thiserror::Error;

/// Errors emitted while reading response XML.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("XML parse error: {0}")]
    XmlParse(String),
    #[error("XPath error: {0}")]
    XPath(String),
    #[error("missing required field: {0}")]
    MissingField(String),
}

fn parse_document(xml: &str) -> Result<Document, ResponseError> {
    Parser::default()
        .parse_string(xml)
        .map_err(|e| ResponseError::XmlParse(format!("{e:?}")))
}

/// Parses `xml` into an owned [`Element`] tree. Comments and processing
/// instructions are dropped; CDATA becomes text.
pub fn parse_element(xml: &str) -> Result<Element, ResponseError> {
    let doc = parse_document(xml)?;
    let root = doc
        .get_root_element()
        .ok_or_else(|| ResponseError::XmlParse("document has no root element".into()))?;
    Ok(convert(&root))
}

fn qualified_name(node: &Node) -> String {
    let local = node.get_name();
    match node.get_namespace().map(|ns| ns.get_prefix()) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local,
    }
}

fn convert(node: &Node) -> Element {
    let mut element = Element::new(qualified_name(node));
    for ns in node.get_namespace_declarations() {
        element = element.with_namespace(ns.get_prefix(), ns.get_href());
    }
    for (name, value) in node.get_properties() {
        element = element.with_attribute(name, value);
    }
    for child in node.get_child_nodes() {
        match child.get_type() {
            Some(NodeType::ElementNode) => element.push(convert(&child)),
            Some(NodeType::TextNode) | Some(NodeType::CDataSectionNode) => {
                element.children.push(TreeNode::Text(child.get_content()));
            }
            _ => {}
        }
    }
    element
}

/// Text of the first element whose local name is `local_name`, anywhere in `xml`.
///
/// Used to lift the embedded result string out of a SOAP envelope without
/// caring which prefixes the server chose.
pub fn text_by_local_name(xml: &str, local_name: &str) -> Result<String, ResponseError> {
    let doc = parse_document(xml)?;
    let ctx = xpath::Context::new(&doc).map_err(|e| ResponseError::XPath(format!("{e:?}")))?;
    let nodes = ctx
        .evaluate(&format!("//*[local-name()='{local_name}']"))
        .map_err(|e| ResponseError::XPath(format!("{e:?}")))?
        .get_nodes_as_vec();
    let node = nodes
        .first()
        .ok_or_else(|| ResponseError::MissingField(local_name.to_string()))?;
    let value = node.get_content();
    if value.trim().is_empty() {
        return Err(ResponseError::MissingField(local_name.to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_element_keeps_structure_and_namespaces() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<RetornoConsultaCNPJ xmlns="http://www.prefeitura.sp.gov.br/nfe"><Cabecalho xmlns="" Versao="1"><Sucesso>true</Sucesso></Cabecalho><!-- note --><Detalhe xmlns=""><InscricaoMunicipal><![CDATA[39616924]]></InscricaoMunicipal></Detalhe></RetornoConsultaCNPJ>"#;
        let root = parse_element(xml).unwrap();
        assert_eq!(root.name(), "RetornoConsultaCNPJ");
        assert_eq!(root.namespace(""), Some("http://www.prefeitura.sp.gov.br/nfe"));
        let header = root.child("Cabecalho").unwrap();
        assert_eq!(header.attribute("Versao"), Some("1"));
        assert_eq!(
            root.descendant(&["Detalhe", "InscricaoMunicipal"]).map(Element::text),
            Some("39616924".to_string())
        );
        assert_eq!(root.children().count(), 2);
    }

    #[test]
    fn text_by_local_name_ignores_prefixes() {
        let envelope = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><ConsultaCNPJResponse xmlns="http://www.prefeitura.sp.gov.br/nfe"><RetornoXML>&lt;Retorno/&gt;</RetornoXML></ConsultaCNPJResponse></soap:Body></soap:Envelope>"#;
        assert_eq!(
            text_by_local_name(envelope, "RetornoXML").unwrap(),
            "<Retorno/>"
        );
        assert!(matches!(
            text_by_local_name(envelope, "Missing"),
            Err(ResponseError::MissingField(_))
        ));
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        assert!(matches!(
            parse_element("<open>"),
            Err(ResponseError::XmlParse(_))
        ));
    }
}
