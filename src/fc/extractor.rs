/// Function-call extractor — turns one closed `<function_calls>` block into
/// typed invocations.
///
/// Two-tier parse, in document order:
/// 1. Strict XML via quick-xml.
/// 2. Permissive byte-scanner fallback for malformed-but-salvageable blocks
///    (tolerant of quote style, stray text between elements, a missing
///    closing wrapper tag).
///
/// An invocation without a closing `</invoke>` is never salvaged — an
/// unterminated element yields zero calls for that block.
use std::borrow::Cow;

use memchr::{memchr, memmem};
use rustc_hash::FxHashMap;

use crate::error::ClientError;
use crate::fc::xml;

const FC_OPEN: &[u8] = b"<function_calls>";
const FC_CLOSE: &[u8] = b"</function_calls>";
const INVOKE_OPEN: &[u8] = b"<invoke";
const INVOKE_CLOSE: &[u8] = b"</invoke>";
const PARAMETER_OPEN: &[u8] = b"<parameter";
const PARAMETER_CLOSE: &[u8] = b"</parameter>";

/// One tool invocation extracted from a function-call block.
///
/// Constructed by the extractor, consumed once by the dispatcher, then
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    /// Parameter name -> unescaped value. Names are unique within a call.
    pub parameters: FxHashMap<String, String>,
}

impl FunctionCall {
    /// Parameter lookup with a default for absent keys.
    #[must_use]
    pub fn param_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.parameters.get(name).map_or(default, String::as_str)
    }

    /// Parameter parsed as a boolean; absent or unparsable values fall back
    /// to `default`.
    #[must_use]
    pub fn param_bool(&self, name: &str, default: bool) -> bool {
        self.parameters
            .get(name)
            .and_then(|value| match value.trim() {
                "true" | "True" | "1" => Some(true),
                "false" | "False" | "0" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    /// Parameter parsed as an unsigned integer with a default.
    #[must_use]
    pub fn param_usize(&self, name: &str, default: usize) -> usize {
        self.parameters
            .get(name)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// Extract tool invocations from one function-call block, in document order.
///
/// The block is expected to start with `<function_calls>`; the closing tag
/// may be missing when the upstream stream ended mid-block, in which case
/// extraction is attempted on what arrived.
///
/// A block containing no `<invoke>` elements at all is valid and yields an
/// empty vector.
///
/// # Errors
///
/// Returns [`ClientError::MalformedBlock`] when the block contains
/// invocation markup that neither tier could decode (unbalanced tags,
/// missing `name` attributes).
pub fn extract_function_calls(block: &str) -> Result<Vec<FunctionCall>, ClientError> {
    let bytes = block.as_bytes();
    let Some(open_at) = memmem::find(bytes, FC_OPEN) else {
        return Err(ClientError::MalformedBlock(
            "missing <function_calls> opening tag".to_string(),
        ));
    };
    let content_start = open_at + FC_OPEN.len();
    let content_end = memmem::find(&bytes[content_start..], FC_CLOSE)
        .map_or(block.len(), |rel| content_start + rel);
    let content = &block[content_start..content_end];

    if memmem::find(content.as_bytes(), INVOKE_OPEN).is_none() {
        return Ok(Vec::new());
    }

    let calls = match parse_strict(block) {
        Ok(calls) => calls,
        Err(strict_err) => {
            tracing::debug!("strict parse failed, trying permissive: {strict_err}");
            parse_permissive(content)?
        }
    };

    for call in &calls {
        if call.name.is_empty() {
            return Err(ClientError::MalformedBlock(
                "invocation has empty name".to_string(),
            ));
        }
    }
    if calls.is_empty() {
        return Err(ClientError::MalformedBlock(
            "block contains invocation markup but no complete invocation".to_string(),
        ));
    }
    Ok(calls)
}

// ---------------------------------------------------------------------------
// Tier 1: strict XML parse via quick-xml
// ---------------------------------------------------------------------------

enum StrictState {
    Outside,
    InFunctionCalls,
    InInvoke {
        name: String,
        params: FxHashMap<String, String>,
    },
    InParameter {
        invoke_name: String,
        invoke_params: FxHashMap<String, String>,
        param_name: String,
        param_text: String,
    },
}

fn parse_strict(xml_text: &str) -> Result<Vec<FunctionCall>, ClientError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml_text);
    let mut results: Vec<FunctionCall> = Vec::with_capacity(2);
    let mut state = StrictState::Outside;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                let tag = name.as_ref();
                match state {
                    StrictState::Outside if tag == b"function_calls" => {
                        state = StrictState::InFunctionCalls;
                    }
                    StrictState::InFunctionCalls if tag == b"invoke" => {
                        let name = required_name_attr(e)?;
                        state = StrictState::InInvoke {
                            name,
                            params: FxHashMap::default(),
                        };
                    }
                    StrictState::InInvoke {
                        ref name,
                        ref params,
                    } if tag == b"parameter" => {
                        let param_name = required_name_attr(e)?;
                        state = StrictState::InParameter {
                            invoke_name: name.clone(),
                            invoke_params: params.clone(),
                            param_name,
                            param_text: String::new(),
                        };
                    }
                    _ => {
                        // Unknown nested tag — skip.
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = e.name();
                let tag = name.as_ref();
                match state {
                    StrictState::InFunctionCalls if tag == b"invoke" => {
                        // Self-closing invoke: a call with no parameters.
                        results.push(FunctionCall {
                            name: required_name_attr(e)?,
                            parameters: FxHashMap::default(),
                        });
                    }
                    StrictState::InInvoke { ref mut params, .. } if tag == b"parameter" => {
                        params.insert(required_name_attr(e)?, String::new());
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                let tag = name.as_ref();
                match state {
                    StrictState::InParameter {
                        ref invoke_name,
                        ref mut invoke_params,
                        ref param_name,
                        ref param_text,
                    } if tag == b"parameter" => {
                        invoke_params.insert(param_name.clone(), param_text.clone());
                        let name = invoke_name.clone();
                        let params = std::mem::take(invoke_params);
                        state = StrictState::InInvoke { name, params };
                    }
                    StrictState::InInvoke {
                        ref name,
                        ref mut params,
                    } if tag == b"invoke" => {
                        results.push(FunctionCall {
                            name: name.clone(),
                            parameters: std::mem::take(params),
                        });
                        state = StrictState::InFunctionCalls;
                    }
                    StrictState::InFunctionCalls if tag == b"function_calls" => {
                        state = StrictState::Outside;
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if let StrictState::InParameter {
                    ref mut param_text, ..
                } = state
                {
                    match e.unescape() {
                        Ok(cow) => param_text.push_str(&cow),
                        Err(_) => param_text.push_str(&String::from_utf8_lossy(e.as_ref())),
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if let StrictState::InParameter {
                    ref mut param_text, ..
                } = state
                {
                    // quick-xml yields the raw CDATA content without the
                    // `<![CDATA[` / `]]>` wrapper.
                    param_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ClientError::MalformedBlock(format!("XML parse error: {e}")));
            }
            _ => {}
        }
    }

    if results.is_empty() {
        return Err(ClientError::MalformedBlock(
            "strict XML parse found no invocation elements".to_string(),
        ));
    }
    Ok(results)
}

fn required_name_attr(e: &quick_xml::events::BytesStart<'_>) -> Result<String, ClientError> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"name" {
            return Ok(String::from_utf8_lossy(&attr.value).to_string());
        }
    }
    Err(ClientError::MalformedBlock(format!(
        "missing 'name' attribute on <{}>",
        String::from_utf8_lossy(e.name().as_ref()),
    )))
}

// ---------------------------------------------------------------------------
// Tier 2: permissive byte scanner
// ---------------------------------------------------------------------------

fn parse_permissive(content: &str) -> Result<Vec<FunctionCall>, ClientError> {
    let bytes = content.as_bytes();
    let mut results: Vec<FunctionCall> = Vec::with_capacity(2);

    let mut cursor = 0usize;
    while let Some(open_rel) = memmem::find(&bytes[cursor..], INVOKE_OPEN) {
        let invoke_start = cursor + open_rel;
        let Some(tag_end_rel) = memchr(b'>', &bytes[invoke_start..]) else {
            break;
        };
        let invoke_tag_end = invoke_start + tag_end_rel;
        let Some(start_tag) = content.get(invoke_start..=invoke_tag_end) else {
            break;
        };
        let Some(name) = extract_name_attr_ascii(start_tag).map(ToOwned::to_owned) else {
            cursor = invoke_tag_end + 1;
            continue;
        };

        // Self-closing invoke carries no parameters.
        if start_tag.trim_end().ends_with("/>") {
            results.push(FunctionCall {
                name,
                parameters: FxHashMap::default(),
            });
            cursor = invoke_tag_end + 1;
            continue;
        }

        let body_start = invoke_tag_end + 1;
        // No closing tag means an unterminated invocation; never salvaged.
        let Some(close_rel) = memmem::find(&bytes[body_start..], INVOKE_CLOSE) else {
            break;
        };
        let body_end = body_start + close_rel;
        let Some(invoke_body) = content.get(body_start..body_end) else {
            break;
        };

        results.push(FunctionCall {
            name,
            parameters: parse_parameters(invoke_body),
        });
        cursor = body_end + INVOKE_CLOSE.len();
    }

    if results.is_empty() {
        return Err(ClientError::MalformedBlock(
            "permissive parse found no complete invocation elements".to_string(),
        ));
    }
    Ok(results)
}

fn parse_parameters(invoke_body: &str) -> FxHashMap<String, String> {
    let bytes = invoke_body.as_bytes();
    let mut params = FxHashMap::default();
    let mut cursor = 0usize;
    while let Some(open_rel) = memmem::find(&bytes[cursor..], PARAMETER_OPEN) {
        let param_start = cursor + open_rel;
        let Some(tag_end_rel) = memchr(b'>', &bytes[param_start..]) else {
            break;
        };
        let param_tag_end = param_start + tag_end_rel;
        let Some(param_tag) = invoke_body.get(param_start..=param_tag_end) else {
            break;
        };
        let Some(param_name) = extract_name_attr_ascii(param_tag).map(ToOwned::to_owned) else {
            cursor = param_tag_end + 1;
            continue;
        };
        if param_tag.trim_end().ends_with("/>") {
            params.insert(param_name, String::new());
            cursor = param_tag_end + 1;
            continue;
        }
        let value_start = param_tag_end + 1;
        let Some(close_rel) = memmem::find(&bytes[value_start..], PARAMETER_CLOSE) else {
            break;
        };
        let value_end = value_start + close_rel;
        let Some(raw_value) = invoke_body.get(value_start..value_end) else {
            break;
        };
        for warning in xml::validate(raw_value) {
            tracing::warn!(parameter = %param_name, "{warning}");
        }
        let value = xml::unescape(unwrap_cdata(raw_value).as_ref()).into_owned();
        params.insert(param_name, value);
        cursor = value_end + PARAMETER_CLOSE.len();
    }
    params
}

/// Extract a `name="..."` / `name='...'` attribute from a start tag.
fn extract_name_attr_ascii(tag: &str) -> Option<&str> {
    const ATTR: &[u8] = b"name";
    let bytes = tag.as_bytes();
    let mut search_from = 0usize;
    while let Some(rel_name) = memmem::find(&bytes[search_from..], ATTR) {
        let name_start = search_from + rel_name;
        let name_end = name_start + ATTR.len();
        if name_start > 0 && is_ascii_attr_char(bytes[name_start - 1]) {
            search_from = name_start + 1;
            continue;
        }
        if bytes.get(name_end).copied().is_some_and(is_ascii_attr_char) {
            search_from = name_start + 1;
            continue;
        }
        let mut idx = name_end;
        while bytes.get(idx).is_some_and(u8::is_ascii_whitespace) {
            idx += 1;
        }
        if bytes.get(idx) != Some(&b'=') {
            search_from = name_start + 1;
            continue;
        }
        idx += 1;
        while bytes.get(idx).is_some_and(u8::is_ascii_whitespace) {
            idx += 1;
        }
        let quote = *bytes.get(idx)?;
        if quote != b'"' && quote != b'\'' {
            search_from = name_start + 1;
            continue;
        }
        let value_start = idx + 1;
        let value_end_rel = memchr(quote, &bytes[value_start..])?;
        let value_end = value_start + value_end_rel;
        return tag.get(value_start..value_end).map(str::trim);
    }
    None
}

#[inline]
const fn is_ascii_attr_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b':')
}

/// Unwrap `<![CDATA[...]]>` sections, concatenating their inner content.
/// Text without CDATA is returned as-is; a CDATA open without its close is
/// left untouched.
fn unwrap_cdata(text: &str) -> Cow<'_, str> {
    const CDATA_OPEN: &[u8] = b"<![CDATA[";
    const CDATA_CLOSE: &[u8] = b"]]>";

    let bytes = text.as_bytes();
    let mut out: Option<String> = None;
    let mut cursor = 0usize;

    while let Some(open_rel) = memmem::find(&bytes[cursor..], CDATA_OPEN) {
        let open = cursor + open_rel;
        let content_start = open + CDATA_OPEN.len();
        let Some(close_rel) = memmem::find(&bytes[content_start..], CDATA_CLOSE) else {
            return Cow::Borrowed(text);
        };
        let content_end = content_start + close_rel;
        if let Some(part) = text.get(content_start..content_end) {
            out.get_or_insert_with(|| String::with_capacity(text.len()))
                .push_str(part);
        }
        cursor = content_end + CDATA_CLOSE.len();
    }

    out.map_or_else(|| Cow::Borrowed(text), Cow::Owned)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
