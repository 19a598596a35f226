//! Canonical pretty-printer for STL syntax trees.
//!
//! Emits source text that re-parses to a structurally equal tree. Output is
//! deterministic: declaration order is preserved, one declaration per line
//! group, four-space indents.

use crate::ast::*;
use crate::Spanned;
use std::fmt::Write;

/// Render a whole module back to STL source.
pub fn module_to_stl(module: &ModuleSyntax) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {};", module.name.node);
    for item in &module.items {
        out.push('\n');
        match &item.node {
            Item::Const(c) => print_const(&mut out, c),
            Item::Role(r) => print_role(&mut out, r),
            Item::State(s) => print_state(&mut out, s),
            Item::Message(m) => print_message(&mut out, m, 0),
            Item::Qualifier(q) => print_qualifier(&mut out, q),
            Item::Event(e) => print_event(&mut out, e),
            Item::Transition(t) => print_transition(&mut out, t),
        }
    }
    out
}

fn print_const(out: &mut String, c: &ConstDef) {
    let value = match &c.value.node {
        ConstValue::Literal(lit) => literal_to_stl(lit),
        ConstValue::Ref(name) => name.clone(),
    };
    let _ = writeln!(out, "const {} {} = {};", c.ty, c.name.node, value);
}

fn print_role(out: &mut String, r: &RoleDef) {
    let _ = writeln!(out, "role {} {{", r.name.node);
    for field in &r.fields {
        let _ = writeln!(out, "    {} {};", field.ty, field.name.node);
    }
    let _ = writeln!(out, "}}");
}

fn print_state(out: &mut String, s: &StateDef) {
    let _ = writeln!(
        out,
        "state {}{} {{",
        s.name.node,
        params_to_stl(&s.params)
    );
    for value in &s.values {
        let _ = writeln!(out, "    {},", value.node);
    }
    let _ = writeln!(out, "}}");
}

fn print_message(out: &mut String, m: &MessageDef, depth: usize) {
    let pad = "    ".repeat(depth);
    let array = if m.is_array { "[]" } else { "" };
    let _ = writeln!(out, "{pad}message{array} {} {{", m.name.node);
    if let Some(encoding) = &m.encoding {
        let _ = writeln!(out, "{pad}    encode \"{}\";", encoding.node);
    }
    if let Some(external) = &m.external {
        let _ = writeln!(out, "{pad}    external \"{}\";", external.node);
    }
    for field in &m.fields {
        let keyword = match field.multiplicity {
            Multiplicity::Required => "required",
            Multiplicity::Optional => "optional",
            Multiplicity::Repeated => "repeated",
        };
        let _ = writeln!(out, "{pad}    {keyword} {} {};", field.ty, field.name.node);
    }
    for sub in &m.nested {
        print_message(out, sub, depth + 1);
    }
    let _ = writeln!(out, "{pad}}}");
}

fn print_qualifier(out: &mut String, q: &QualifierDef) {
    let _ = writeln!(
        out,
        "qualifier {} {}{} = external \"{}\";",
        q.return_ty,
        q.name.node,
        params_to_stl(&q.params),
        q.external.node
    );
}

fn print_event(out: &mut String, e: &EventDef) {
    let head = format!("event {}{}", e.name.node, params_to_stl(&e.params));
    match &e.body {
        EventBody::NoOp => {
            let _ = writeln!(out, "{head};");
        }
        EventBody::External(name) => {
            let _ = writeln!(out, "{head} = external \"{}\";", name.node);
        }
        EventBody::Composite(call) => {
            let _ = writeln!(out, "{head} = {};", call_to_stl(call));
        }
    }
}

fn print_transition(out: &mut String, t: &TransitionDef) {
    let head = format!("transition {}{}", t.name.node, params_to_stl(&t.params));
    match &t.body {
        TransitionBody::Binding(call) => {
            let _ = writeln!(out, "{head} = {};", call_to_stl(call));
        }
        TransitionBody::Full(block) => {
            let _ = writeln!(out, "{head} {{");
            for local in &block.locals {
                let _ = writeln!(out, "    {} {};", local.ty, local.name.node);
            }
            let pre: Vec<String> = block.pre_states.iter().map(state_match_to_stl).collect();
            let _ = writeln!(out, "    pre_states = [ {} ]", pre.join(", "));
            let _ = writeln!(out, "    events {{");
            for line in &block.events {
                let _ = writeln!(
                    out,
                    "        {} -> {} -> {};",
                    line.source.node,
                    call_to_stl(&line.call),
                    line.target.node
                );
            }
            let _ = writeln!(out, "    }}");
            let post: Vec<String> = block.post_states.iter().map(state_assign_to_stl).collect();
            let _ = writeln!(out, "    post_states = [ {} ]", post.join(", "));
            if let Some(error_states) = &block.error_states {
                let err: Vec<String> = error_states.iter().map(state_assign_to_stl).collect();
                let _ = writeln!(out, "    error_states = [ {} ]", err.join(", "));
            }
            let _ = writeln!(out, "}}");
        }
    }
}

fn params_to_stl(params: &[ParamDef]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let items: Vec<String> = params
        .iter()
        .map(|p| {
            let amp = if p.by_ref { "&" } else { "" };
            format!("{} {amp}{}", p.ty, p.name.node)
        })
        .collect();
    format!("({})", items.join(", "))
}

fn state_match_to_stl(m: &StateMatch) -> String {
    let values = if m.values.len() == 1 {
        m.values[0].node.clone()
    } else {
        let names: Vec<&str> = m.values.iter().map(|v| v.node.as_str()).collect();
        format!("{{{}}}", names.join(", "))
    };
    format!("{}{}.{}", m.state.node, args_to_stl(&m.args), values)
}

fn state_assign_to_stl(a: &StateAssign) -> String {
    format!("{}{}.{}", a.state.node, args_to_stl(&a.args), a.value.node)
}

fn call_to_stl(call: &CallExpr) -> String {
    format!("{}{}", call.target.node, args_to_stl(&call.args))
}

fn args_to_stl(args: &[Spanned<Expr>]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let items: Vec<String> = args.iter().map(|a| expr_to_stl(&a.node)).collect();
    format!("({})", items.join(", "))
}

fn expr_to_stl(expr: &Expr) -> String {
    match expr {
        Expr::Literal(lit) => literal_to_stl(lit),
        Expr::Ref(path) => path.join("."),
        Expr::RefOut(path) => format!("&{}", path.join(".")),
        Expr::MessageLiteral { name, fields } => {
            format!("{} {}", name.node, field_inits_to_stl(fields))
        }
        Expr::MessageArray { name, elements } => {
            let items: Vec<String> = elements.iter().map(|e| field_inits_to_stl(e)).collect();
            format!("{} [ {} ]", name.node, items.join(", "))
        }
        Expr::Array(items) => {
            let items: Vec<String> = items.iter().map(|e| expr_to_stl(&e.node)).collect();
            format!("[ {} ]", items.join(", "))
        }
        Expr::Struct(fields) => field_inits_to_stl(fields),
        Expr::Qualifier { name, args, out } => {
            let mut s = format!("{}{}", name.node, args_to_stl(args));
            // Zero-argument qualifier calls still need their parens so the
            // reference grammar cannot swallow the name.
            if args.is_empty() {
                s.push_str("()");
            }
            if let Some(out) = out {
                let _ = write!(s, " -> {}", out.node);
            }
            s
        }
    }
}

fn field_inits_to_stl(fields: &[FieldInit]) -> String {
    if fields.is_empty() {
        return "{ }".to_string();
    }
    let items: Vec<String> = fields
        .iter()
        .map(|f| format!("{} = {};", f.name.node, expr_to_stl(&f.value.node)))
        .collect();
    format!("{{ {} }}", items.join(" "))
}

fn literal_to_stl(lit: &Literal) -> String {
    match lit {
        Literal::Int(v) => v.to_string(),
        Literal::Bool(v) => v.to_string(),
        Literal::Str(v) => {
            let mut s = String::with_capacity(v.len() + 2);
            s.push('"');
            for ch in v.chars() {
                if ch == '"' || ch == '\\' {
                    s.push('\\');
                }
                s.push(ch);
            }
            s.push('"');
            s
        }
        Literal::Null => "null".to_string(),
    }
}
