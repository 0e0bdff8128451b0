//! Decryption routine exposure in utility bundles.
//!
//! The site ships its decryption routine inside an obfuscated bundle whose
//! shape changes between releases. Each known shape has a locator strategy;
//! strategies are tried in a fixed order and the first hit wins. Bundles of
//! several releases can be cached by CDNs at once, so strategies are only
//! ever appended.

use super::lexer::TokenKind;
use super::tree::SyntaxTree;
use super::Edit;
use crate::bridge;
use crate::config::SiteProfile;

/// Finds where to bind the decryption routine in one bundle shape.
pub trait LocatorStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn locate(&self, tree: &SyntaxTree<'_>, site: &SiteProfile) -> Option<Edit>;
}

/// All strategies, in the order they are tried.
pub const STRATEGIES: &[&dyn LocatorStrategy] = &[&DirectProperty, &IndexedArray, &NestedMember];

/// Result of a script rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRewrite {
    pub body: String,
    /// Name of the strategy that matched, if any.
    pub strategy: Option<&'static str>,
}

/// Rewrite a utility bundle so the decryption routine is reachable through
/// the exposed decryption global. Identity when nothing matches.
pub fn rewrite_script(site: &SiteProfile, url: &str, body: &str) -> String {
    rewrite_script_detailed(site, url, body).body
}

pub fn rewrite_script_detailed(site: &SiteProfile, url: &str, body: &str) -> ScriptRewrite {
    let unchanged = || ScriptRewrite {
        body: body.to_string(),
        strategy: None,
    };
    if !site.is_utility_script(url) || body.contains(bridge::decrypt_global()) {
        return unchanged();
    }
    let tree = match SyntaxTree::parse(body) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::warn!(url, "cannot tokenize utility script: {e}");
            return unchanged();
        }
    };
    for strategy in STRATEGIES {
        let Some(edit) = strategy.locate(&tree, site) else {
            continue;
        };
        if let Some(rewritten) = edit.apply(body) {
            tracing::info!(url, strategy = strategy.name(), "decryption routine exposed");
            return ScriptRewrite {
                body: rewritten,
                strategy: Some(strategy.name()),
            };
        }
    }
    tracing::warn!(url, "no locator strategy matched the utility script");
    unchanged()
}

// ── Direct property ──

/// `x['decryption'] = …` or `x.decryption = …`: bind the assigned value.
pub struct DirectProperty;

impl LocatorStrategy for DirectProperty {
    fn name(&self) -> &'static str {
        "direct-property"
    }

    fn locate(&self, tree: &SyntaxTree<'_>, site: &SiteProfile) -> Option<Edit> {
        (0..tree.len()).find_map(|i| {
            let access = tree.property_access_at(i)?;
            if access.name != site.decryption_property || !tree.is_punct(access.last + 1, "=") {
                return None;
            }
            Some(Edit::insert(
                tree.token(access.last + 1).end,
                bridge::decrypt_binding_prefix(),
            ))
        })
    }
}

// ── Indexed array ──

/// The property name lives in a string table and every use goes through an
/// accessor called with a hex index: `x[_0xab('0x1f')] = …`. The table is
/// rotated at startup by a constant passed alongside it, `(_0x12ab, 0x1c3)`.
pub struct IndexedArray;

impl LocatorStrategy for IndexedArray {
    fn name(&self) -> &'static str {
        "indexed-array"
    }

    fn locate(&self, tree: &SyntaxTree<'_>, site: &SiteProfile) -> Option<Edit> {
        let element = (0..tree.len()).find(|&i| {
            tree.str_value(i).as_deref() == Some(site.decryption_property.as_str())
                && tree.parent(i).is_some_and(|p| is_array_literal(tree, p))
        })?;
        let array = tree.parent(element)?;
        let (position, length) = element_position(tree, array, element)?;

        let rotation = array_name(tree, array)
            .and_then(|name| rotation_offset(tree, name))
            .unwrap_or(0);
        let logical = (position + length - (rotation % length as u64) as usize) % length;
        let wanted = format!("0x{logical:x}");
        tracing::debug!(position, length, rotation, index = %wanted, "resolved string table index");

        (0..tree.len()).find_map(|i| {
            if !is_index_literal(tree, i, &wanted) {
                return None;
            }
            let args = tree.parent(i).filter(|&p| tree.is_punct(p, "("))?;
            let member = tree.parent(args).filter(|&p| tree.is_punct(p, "["))?;
            if !tree.ends_object(member.checked_sub(1)?) {
                return None;
            }
            let assign = tree.matching(member)? + 1;
            tree.is_punct(assign, "=").then(|| {
                Edit::insert(tree.token(assign).end, bridge::decrypt_binding_prefix())
            })
        })
    }
}

fn is_array_literal(tree: &SyntaxTree<'_>, open: usize) -> bool {
    tree.is_punct(open, "[")
        && open
            .checked_sub(1)
            .map_or(true, |prev| !tree.ends_object(prev))
}

/// Position of `element` among the array's elements, and the element count.
fn element_position(tree: &SyntaxTree<'_>, array: usize, element: usize) -> Option<(usize, usize)> {
    let children: Vec<usize> = tree.children(array).collect();
    let commas: Vec<usize> = children
        .iter()
        .copied()
        .filter(|&c| tree.is_punct(c, ","))
        .collect();
    let position = commas.iter().filter(|&&c| c < element).count();
    let trailing = children.last().is_some_and(|&c| tree.is_punct(c, ","));
    let length = commas.len() + 1 - usize::from(trailing);
    (position < length).then_some((position, length))
}

/// Identifier the array literal is assigned to: `var a = [` or `a = [`.
fn array_name<'a>(tree: &SyntaxTree<'a>, array: usize) -> Option<&'a str> {
    let assign = array.checked_sub(1)?;
    let name = assign.checked_sub(1)?;
    (tree.is_punct(assign, "=") && tree.kind(name) == Some(TokenKind::Ident))
        .then(|| tree.text(name))
}

/// Rotation constant passed next to the table: `(name, 0x1c3)`.
fn rotation_offset(tree: &SyntaxTree<'_>, name: &str) -> Option<u64> {
    (1..tree.len().saturating_sub(3)).find_map(|i| {
        let shaped = tree.is_ident(i, name)
            && (tree.is_punct(i - 1, "(") || tree.is_punct(i - 1, ","))
            && tree.is_punct(i + 1, ",")
            && tree.is_punct(i + 3, ")");
        if shaped {
            tree.int_value(i + 2)
        } else {
            None
        }
    })
}

fn is_index_literal(tree: &SyntaxTree<'_>, i: usize, wanted: &str) -> bool {
    match tree.kind(i) {
        Some(TokenKind::Str) => tree
            .str_value(i)
            .is_some_and(|v| v.eq_ignore_ascii_case(wanted)),
        Some(TokenKind::Num) => tree.text(i).eq_ignore_ascii_case(wanted),
        _ => false,
    }
}

// ── Nested member ──

/// `…['AES']['decrypt'](…)` or `….AES.decrypt(…)` inside a function: bind
/// the nearest enclosing function.
pub struct NestedMember;

/// Tokens after which an assignment expression may start without parentheses.
const ASSIGNMENT_CONTEXT: &[&str] = &[
    "=", "(", ",", ":", "?", "[", "=>", "...", "+=", "-=", "||=", "&&=", "??=",
];

impl LocatorStrategy for NestedMember {
    fn name(&self) -> &'static str {
        "nested-member"
    }

    fn locate(&self, tree: &SyntaxTree<'_>, site: &SiteProfile) -> Option<Edit> {
        (0..tree.len()).find_map(|i| {
            let access = tree.property_access_at(i)?;
            if access.name != site.decrypt_method {
                return None;
            }
            let owner = tree.property_access_ending_at(access.first.checked_sub(1)?)?;
            if !site.cipher_names.iter().any(|c| *c == owner.name) {
                return None;
            }
            tree.ancestors(i)
                .filter(|&open| tree.is_punct(open, "{"))
                .find_map(|body| bind_function(tree, body))
        })
    }
}

/// Edit binding the function whose body opens at `body`, or `None` when the
/// brace is not a function body.
fn bind_function(tree: &SyntaxTree<'_>, body: usize) -> Option<Edit> {
    let body_end = tree.matching(body)?;
    let before = body.checked_sub(1)?;
    let prefix = bridge::decrypt_binding_prefix();

    if tree.is_punct(before, "=>") {
        let params = before.checked_sub(1)?;
        let mut start = if tree.is_punct(params, ")") {
            tree.matching(params)?
        } else if tree.kind(params) == Some(TokenKind::Ident) {
            params
        } else {
            return None;
        };
        if start > 0 && tree.is_ident(start - 1, "async") {
            start -= 1;
        }
        return Some(bind_expression(tree, start, body_end, &prefix));
    }

    if !tree.is_punct(before, ")") {
        return None;
    }
    let params = tree.matching(before)?;
    let keyword = params.checked_sub(1)?;
    let (mut start, name) = if tree.is_ident(keyword, "function") {
        (keyword, None)
    } else if keyword > 0
        && tree.kind(keyword) == Some(TokenKind::Ident)
        && tree.is_ident(keyword - 1, "function")
    {
        (keyword - 1, Some(tree.text(keyword)))
    } else {
        return None;
    };
    if start > 0 && tree.is_ident(start - 1, "async") {
        start -= 1;
    }

    if is_statement_start(tree, start) {
        // declaration: bind by name once it exists
        let name = name?;
        let statement = format!("\n{prefix}{name};");
        return Some(Edit::insert(tree.token(body_end).end, statement));
    }
    Some(bind_expression(tree, start, body_end, &prefix))
}

fn bind_expression(tree: &SyntaxTree<'_>, start: usize, end: usize, prefix: &str) -> Edit {
    let at = tree.token(start).start;
    let bare = start
        .checked_sub(1)
        .is_some_and(|prev| {
            tree.kind(prev) == Some(TokenKind::Punct) && ASSIGNMENT_CONTEXT.contains(&tree.text(prev))
                || tree.is_ident(prev, "return")
        });
    if bare {
        Edit::insert(at, prefix)
    } else {
        Edit::insert(at, format!("({prefix}")).and_insert(tree.token(end).end, ")")
    }
}

fn is_statement_start(tree: &SyntaxTree<'_>, i: usize) -> bool {
    match i.checked_sub(1) {
        None => true,
        Some(prev) => {
            tree.is_punct(prev, ";") || tree.is_punct(prev, "{") || tree.is_punct(prev, "}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://cdn.example.com/web/wrwebnjlogic/js/utils.1a2b.js";

    fn rewrite(body: &str) -> ScriptRewrite {
        rewrite_script_detailed(&SiteProfile::default(), URL, body)
    }

    fn binding() -> String {
        bridge::decrypt_binding_prefix()
    }

    #[test]
    fn test_foreign_url_is_identity() {
        let body = "a['decryption']=function(){}";
        let out = rewrite_script(&SiteProfile::default(), "https://cdn.example.com/app.js", body);
        assert_eq!(out, body);
    }

    #[test]
    fn test_direct_bracket_property() {
        let out = rewrite("var t={};t['decryption']=function(e){return e};");
        assert_eq!(out.strategy, Some("direct-property"));
        assert_eq!(
            out.body,
            format!("var t={{}};t['decryption']={}function(e){{return e}};", binding())
        );
    }

    #[test]
    fn test_direct_dot_property() {
        let out = rewrite("o.decryption=n(12);");
        assert_eq!(out.body, format!("o.decryption={}n(12);", binding()));
    }

    #[test]
    fn test_regex_after_if_head_does_not_block_matching() {
        let out = rewrite("if(t)/'/.test(e)&&g();var o={};o['decryption']=function(e){return e};");
        assert_eq!(out.strategy, Some("direct-property"));
        assert!(out.body.contains(&format!("o['decryption']={}function", binding())));
    }

    #[test]
    fn test_regex_after_function_declaration_does_not_block_matching() {
        let out = rewrite("function a(){}\n/\"/.test(x);var o={};o.decryption=function(e){return e};");
        assert_eq!(out.strategy, Some("direct-property"));
        assert!(out.body.contains(&format!("o.decryption={}function", binding())));
    }

    #[test]
    fn test_property_read_is_not_matched() {
        let out = rewrite("if(o.decryption==null){x()}");
        assert_eq!(out.strategy, None);
    }

    #[test]
    fn test_indexed_array_with_rotation() {
        // table rotated by 1: logical index of element 2 is 1
        let body = "var _0xa=['push','shift','decryption'];(function(a,b){})(_0xa,0x1);\
                    var _0xb=function(i){return _0xa[i]};\
                    m[_0xb('0x1')]=function(e){return e};";
        let out = rewrite(body);
        assert_eq!(out.strategy, Some("indexed-array"));
        assert!(out.body.contains(&format!("m[_0xb('0x1')]={}function", binding())));
    }

    #[test]
    fn test_indexed_array_without_rotation() {
        let body = "var k=['a','decryption'];var g=function(i){return k[i]};o[g(0x1)]=h;";
        let out = rewrite(body);
        assert_eq!(out.strategy, Some("indexed-array"));
        assert!(out.body.ends_with(&format!("o[g(0x1)]={}h;", binding())));
    }

    #[test]
    fn test_nested_member_in_function_expression() {
        let body = "var d=function(e,t){return c['AES']['decrypt'](e,t).toString()};";
        let out = rewrite(body);
        assert_eq!(out.strategy, Some("nested-member"));
        assert_eq!(
            out.body,
            format!("var d={}function(e,t){{return c['AES']['decrypt'](e,t).toString()}};", binding())
        );
    }

    #[test]
    fn test_nested_member_in_arrow() {
        let out = rewrite("x.then(async (e)=>{return r.AES.decrypt(e)});");
        assert_eq!(out.body, format!("x.then({}async (e)=>{{return r.AES.decrypt(e)}});", binding()));
    }

    #[test]
    fn test_nested_member_in_declaration_binds_name() {
        let out = rewrite("function s(e){return u.DES.decrypt(e)}s(1);");
        assert_eq!(out.body, format!("function s(e){{return u.DES.decrypt(e)}}\n{}s;s(1);", binding()));
    }

    #[test]
    fn test_nested_member_after_operator_is_parenthesised() {
        let out = rewrite("!function(){q.RC4.decrypt(1)}();");
        assert_eq!(out.body, format!("!({}function(){{q.RC4.decrypt(1)}})();", binding()));
    }

    #[test]
    fn test_unknown_cipher_is_not_matched() {
        let out = rewrite("var d=function(e){return c.XYZ.decrypt(e)};");
        assert_eq!(out.strategy, None);
    }

    #[test]
    fn test_already_exposed_is_identity() {
        let body = format!("a.decryption={}f;", binding());
        assert_eq!(rewrite(&body).body, body);
    }

    #[test]
    fn test_untokenizable_is_identity() {
        let body = "a['decryption']=function(){";
        assert_eq!(rewrite(body).body, body);
    }

    #[test]
    fn test_strategy_order() {
        let names: Vec<&str> = STRATEGIES.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["direct-property", "indexed-array", "nested-member"]);
    }
}
