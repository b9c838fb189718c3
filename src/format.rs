use crate::error::Result;
use crate::ops::list::{element_addr, object_span};
use crate::tagged::{Tag, Word};
use crate::vm::Vm;

// Human-readable rendering for the print opcodes. Numbers render as the
// shortest decimal, near-integers as integers; lists render recursively by
// walking their slot spans.

fn format_number(value: f32) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Inf" } else { "-Inf" }.to_owned();
    }
    let rounded = value.round();
    if (value - rounded).abs() < 1e-4 && rounded.abs() < 1e15 {
        return format!("{}", rounded as i64);
    }
    format!("{value}")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    for ch in text.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            ch => out.push(ch),
        }
    }
    out
}

/// Render a simple (single-cell) value.
pub fn format_value(vm: &Vm, word: Word) -> String {
    match word.tag() {
        Tag::Number => format_number(word.to_f32()),
        Tag::Integer => format!("{}", word.payload() as i16),
        Tag::String => match vm.string(word.payload()) {
            Ok(text) => format!("\"{}\"", escape(&text)),
            Err(_) => format!("[STRING:{}]", word.payload()),
        },
        Tag::Code => format!("[CODE:{}]", word.payload()),
        Tag::Builtin => format!("[BUILTIN:{}]", word.payload()),
        Tag::Ref => format!("[REF:{}]", word.payload()),
        Tag::Sentinel => {
            if word.is_nil() {
                "NIL".to_owned()
            } else {
                format!("[SENTINEL:{}]", word.payload())
            }
        }
        Tag::List => format!("[LIST:{}]", word.payload()),
    }
}

/// Render the object whose highest cell is `top_cell`; lists materialise
/// nested elements inline.
pub fn format_object(vm: &Vm, top_cell: usize) -> Result<String> {
    let header = vm.mem.read_cell(top_cell)?;
    if !header.is_list() {
        return Ok(format_value(vm, header));
    }
    let mut parts = Vec::new();
    let mut index = 0;
    while let Some(cell) = element_addr(vm, top_cell, index)? {
        parts.push(format_object(vm, cell)?);
        index += 1;
    }
    if parts.is_empty() {
        Ok("()".to_owned())
    } else {
        Ok(format!("( {} )", parts.join(" ")))
    }
}

/// Format the whole TOS object without popping; returns the text and the
/// object's span so the caller can drop it.
pub fn format_tos(vm: &Vm) -> Result<(String, usize)> {
    let top = vm.sp - 1;
    let span = object_span(vm, top)?;
    Ok((format_object(vm, top)?, span))
}

/// Internal-representation dump of the TOS object, cell by cell.
pub fn raw_tos(vm: &Vm) -> Result<(String, usize)> {
    let top = vm.sp - 1;
    let span = object_span(vm, top)?;
    let cells: Vec<String> = (top + 1 - span..=top)
        .map(|cell| {
            vm.mem
                .read_cell(cell)
                .map(|word| format!("{word:?}"))
        })
        .collect::<Result<_>>()?;
    Ok((cells.join(" "), span))
}
