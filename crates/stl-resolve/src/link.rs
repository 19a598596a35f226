//! Two-phase linker.
//!
//! Pass 1 registers every top-level name under `module::name` and allocates
//! arena handles. Pass 2 resolves signatures (parameter and field types).
//! Pass 3 resolves bodies into [`Rvalue`] form. A final sweep validates
//! bindings, collects executables, resolves constant values (detecting
//! cycles), and flags recursive composite events.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::program::*;
use crate::suggest::closest_candidate;
use stl_ast::{self as ast, Span, Spanned};

pub(crate) fn link(modules: &[ast::ModuleSyntax]) -> Result<Program, LinkError> {
    let mut linker = Linker::default();
    linker.register(modules)?;
    linker.resolve_signatures(modules)?;
    linker.resolve_const_values(modules)?;
    linker.resolve_bodies(modules)?;
    linker.validate_bindings()?;
    linker.collect_executables();
    linker.flag_recursive_events();
    debug!(
        modules = linker.program.modules.len(),
        transitions = linker.program.transitions.len(),
        executables = linker.program.executables.len(),
        "linked program"
    );
    Ok(linker.program)
}

#[derive(Default)]
struct Linker {
    program: Program,
}

/// Name scope while resolving one body: enclosing parameters and
/// transition-locals.
struct Scope<'a> {
    params: &'a [ParamDecl],
    locals: &'a [LocalDecl],
}

impl<'a> Scope<'a> {
    const EMPTY: Scope<'static> = Scope {
        params: &[],
        locals: &[],
    };

    fn param(&self, name: &str) -> Option<(usize, &ParamDecl)> {
        self.params
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }

    fn local(&self, name: &str) -> Option<(usize, &LocalDecl)> {
        self.locals
            .iter()
            .enumerate()
            .find(|(_, l)| l.name == name)
    }
}

// =============================================================================
// Pass 1: registration
// =============================================================================

impl Linker {
    fn register(&mut self, modules: &[ast::ModuleSyntax]) -> Result<(), LinkError> {
        for module in modules {
            let module_name = &module.name.node;
            if self.program.modules.contains_key(module_name) {
                return Err(LinkError::new(
                    format!("module defined more than once: {module_name}"),
                    module.name.span,
                ));
            }
            let mut decls = ModuleDecls {
                name: module_name.clone(),
                ..Default::default()
            };
            let mut used: HashSet<String> = HashSet::new();

            for item in &module.items {
                let (name, span) = item_name(&item.node);
                if !used.insert(name.clone()) {
                    return Err(LinkError::duplicate(module_name, &name, span));
                }
                match &item.node {
                    ast::Item::Const(c) => {
                        let id = ConstId(self.program.consts.len() as u32);
                        self.program.consts.push(Const {
                            name: qualify(module_name, &c.name.node),
                            ty: Ty::Int,
                            value: ast::Literal::Null,
                            span: c.name.span,
                        });
                        decls.consts.insert(c.name.node.clone(), id);
                    }
                    ast::Item::Role(r) => {
                        let id = RoleId(self.program.roles.len() as u32);
                        self.program.roles.push(Role {
                            name: qualify(module_name, &r.name.node),
                            fields: IndexMap::new(),
                            span: r.name.span,
                        });
                        decls.roles.insert(r.name.node.clone(), id);
                    }
                    ast::Item::State(s) => {
                        let mut values = Vec::new();
                        for value in &s.values {
                            if values.contains(&value.node) {
                                return Err(LinkError::new(
                                    format!("duplicated state value: {}", value.node),
                                    value.span,
                                ));
                            }
                            values.push(value.node.clone());
                        }
                        let id = StateId(self.program.states.len() as u32);
                        self.program.states.push(StateDecl {
                            name: qualify(module_name, &s.name.node),
                            params: Vec::new(),
                            values,
                            span: s.name.span,
                        });
                        decls.states.insert(s.name.node.clone(), id);
                    }
                    ast::Item::Message(m) => {
                        let id = self.register_message(module_name, m, None)?;
                        decls.messages.insert(m.name.node.clone(), id);
                    }
                    ast::Item::Qualifier(q) => {
                        let id = QualifierId(self.program.qualifiers.len() as u32);
                        self.program.qualifiers.push(QualifierDecl {
                            name: qualify(module_name, &q.name.node),
                            ret: Ty::Int,
                            params: Vec::new(),
                            external: q.external.node.clone(),
                            span: q.name.span,
                        });
                        decls.qualifiers.insert(q.name.node.clone(), id);
                    }
                    ast::Item::Event(e) => {
                        let id = EventId(self.program.events.len() as u32);
                        self.program.events.push(EventDecl {
                            name: qualify(module_name, &e.name.node),
                            params: Vec::new(),
                            body: EventBody::NoOp,
                            span: e.name.span,
                        });
                        decls.events.insert(e.name.node.clone(), id);
                    }
                    ast::Item::Transition(t) => {
                        let id = TransitionId(self.program.transitions.len() as u32);
                        self.program.transitions.push(TransitionDecl {
                            name: qualify(module_name, &t.name.node),
                            params: Vec::new(),
                            kind: TransitionKind::Full(empty_body()),
                            span: t.name.span,
                        });
                        decls.transitions.insert(t.name.node.clone(), id);
                    }
                }
            }
            self.program.modules.insert(module_name.clone(), decls);
        }
        Ok(())
    }

    fn register_message(
        &mut self,
        module_name: &str,
        def: &ast::MessageDef,
        parent: Option<&str>,
    ) -> Result<MessageId, LinkError> {
        let fq = match parent {
            Some(parent) => format!("{parent}::{}", def.name.node),
            None => qualify(module_name, &def.name.node),
        };
        let encoding = match &def.encoding {
            Some(enc) => Some(Encoding::parse(&enc.node).ok_or_else(|| {
                LinkError::new(format!("unknown encoding: {}", enc.node), enc.span)
            })?),
            None => None,
        };
        let id = MessageId(self.program.messages.len() as u32);
        self.program.messages.push(MessageDecl {
            name: fq.clone(),
            encoding,
            is_array: def.is_array,
            external: def.external.as_ref().map(|e| e.node.clone()),
            fields: Vec::new(),
            nested: IndexMap::new(),
            span: def.name.span,
        });
        for sub in &def.nested {
            let sub_id = self.register_message(module_name, sub, Some(&fq))?;
            let previous = self.program.messages[id.index()]
                .nested
                .insert(sub.name.node.clone(), sub_id);
            if previous.is_some() {
                return Err(LinkError::duplicate(
                    module_name,
                    &sub.name.node,
                    sub.name.span,
                ));
            }
        }
        Ok(id)
    }
}

// =============================================================================
// Pass 2: signatures
// =============================================================================

impl Linker {
    fn resolve_signatures(&mut self, modules: &[ast::ModuleSyntax]) -> Result<(), LinkError> {
        for module in modules {
            let module_name = module.name.node.clone();
            for item in &module.items {
                match &item.node {
                    ast::Item::Const(c) => {
                        let ty = self.resolve_primitive_ty(&c.ty, c.name.span, "constants")?;
                        let id = self.module(&module_name).consts[&c.name.node];
                        self.program.consts[id.index()].ty = ty;
                    }
                    ast::Item::Role(r) => {
                        let id = self.module(&module_name).roles[&r.name.node];
                        let mut fields = IndexMap::new();
                        for field in &r.fields {
                            let ty = self.resolve_ty(&module_name, None, &field.ty, field.name.span)?;
                            if fields.insert(field.name.node.clone(), ty).is_some() {
                                return Err(LinkError::new(
                                    format!("duplicated field: {}", field.name.node),
                                    field.name.span,
                                ));
                            }
                        }
                        self.program.roles[id.index()].fields = fields;
                    }
                    ast::Item::State(s) => {
                        let params = self.resolve_value_params(&module_name, &s.params)?;
                        let id = self.module(&module_name).states[&s.name.node];
                        self.program.states[id.index()].params = params;
                    }
                    ast::Item::Message(m) => {
                        self.resolve_message_fields(&module_name, m, None)?;
                    }
                    ast::Item::Qualifier(q) => {
                        let ret = self.resolve_primitive_ty(
                            &q.return_ty,
                            q.name.span,
                            "qualifier return values",
                        )?;
                        let params = self.resolve_value_params(&module_name, &q.params)?;
                        let id = self.module(&module_name).qualifiers[&q.name.node];
                        let decl = &mut self.program.qualifiers[id.index()];
                        decl.ret = ret;
                        decl.params = params;
                    }
                    ast::Item::Event(e) => {
                        let params = self.resolve_params(&module_name, &e.params)?;
                        let id = self.module(&module_name).events[&e.name.node];
                        self.program.events[id.index()].params = params;
                    }
                    ast::Item::Transition(t) => {
                        let params = self.resolve_value_or_role_params(&module_name, &t.params)?;
                        let id = self.module(&module_name).transitions[&t.name.node];
                        self.program.transitions[id.index()].params = params;
                    }
                }
            }
        }
        Ok(())
    }

    fn module(&self, name: &str) -> &ModuleDecls {
        &self.program.modules[name]
    }

    fn resolve_ty(
        &self,
        module_name: &str,
        enclosing: Option<MessageId>,
        ty: &ast::TypeName,
        span: Span,
    ) -> Result<Ty, LinkError> {
        match ty {
            ast::TypeName::Bool => Ok(Ty::Bool),
            ast::TypeName::Int => Ok(Ty::Int),
            ast::TypeName::String => Ok(Ty::Str),
            ast::TypeName::Role => Ok(Ty::Role),
            ast::TypeName::Named(name) => {
                // Nested messages shadow module-level ones.
                if let Some(enclosing) = enclosing {
                    if let Some(id) = self.program.message(enclosing).nested.get(name) {
                        return Ok(Ty::Message(*id));
                    }
                }
                let module = self.module(module_name);
                if let Some(id) = module.messages.get(name) {
                    return Ok(Ty::Message(*id));
                }
                let suggestion =
                    closest_candidate(name, module.messages.keys().map(String::as_str));
                Err(LinkError::unresolved("message", name, suggestion, span))
            }
        }
    }

    /// Primitive-only types (constants, qualifier returns).
    fn resolve_primitive_ty(
        &self,
        ty: &ast::TypeName,
        span: Span,
        what: &str,
    ) -> Result<Ty, LinkError> {
        match ty {
            ast::TypeName::Bool => Ok(Ty::Bool),
            ast::TypeName::Int => Ok(Ty::Int),
            ast::TypeName::String => Ok(Ty::Str),
            other => Err(LinkError::new(
                format!("{what} must be bool, int, or string, not {other}"),
                span,
            )),
        }
    }

    /// Parameter lists that admit any type and the `&` marker (events).
    fn resolve_params(
        &self,
        module_name: &str,
        params: &[ast::ParamDef],
    ) -> Result<Vec<ParamDecl>, LinkError> {
        let mut resolved: Vec<ParamDecl> = Vec::new();
        for param in params {
            if resolved.iter().any(|p| p.name == param.name.node) {
                return Err(LinkError::new(
                    format!("duplicated param: {}", param.name.node),
                    param.name.span,
                ));
            }
            let ty = self.resolve_ty(module_name, None, &param.ty, param.name.span)?;
            resolved.push(ParamDecl {
                name: param.name.node.clone(),
                ty,
                by_ref: param.by_ref,
            });
        }
        Ok(resolved)
    }

    /// Parameter lists that only pass values (states, qualifiers).
    fn resolve_value_params(
        &self,
        module_name: &str,
        params: &[ast::ParamDef],
    ) -> Result<Vec<Ty>, LinkError> {
        let mut resolved = Vec::new();
        for param in params {
            if param.by_ref {
                return Err(LinkError::new(
                    format!("parameter '{}' cannot be a reference here", param.name.node),
                    param.name.span,
                ));
            }
            resolved.push(self.resolve_ty(module_name, None, &param.ty, param.name.span)?);
        }
        Ok(resolved)
    }

    /// Transition parameters: values or roles, never references.
    fn resolve_value_or_role_params(
        &self,
        module_name: &str,
        params: &[ast::ParamDef],
    ) -> Result<Vec<ParamDecl>, LinkError> {
        for param in params {
            if param.by_ref {
                return Err(LinkError::new(
                    format!(
                        "transition parameter '{}' cannot be a reference",
                        param.name.node
                    ),
                    param.name.span,
                ));
            }
        }
        self.resolve_params(module_name, params)
    }

    fn resolve_message_fields(
        &mut self,
        module_name: &str,
        def: &ast::MessageDef,
        parent: Option<MessageId>,
    ) -> Result<(), LinkError> {
        let id = match parent {
            Some(parent) => self.program.message(parent).nested[&def.name.node],
            None => self.module(module_name).messages[&def.name.node],
        };
        let mut resolved: Vec<FieldDecl> = Vec::new();
        for field in &def.fields {
            if resolved.iter().any(|f| f.name == field.name.node) {
                return Err(LinkError::new(
                    format!("duplicated field: {}", field.name.node),
                    field.name.span,
                ));
            }
            let ty = self.resolve_ty(module_name, Some(id), &field.ty, field.name.span)?;
            resolved.push(FieldDecl {
                name: field.name.node.clone(),
                ty,
                multiplicity: field.multiplicity,
            });
        }
        self.program.messages[id.index()].fields = resolved;
        for sub in &def.nested {
            self.resolve_message_fields(module_name, sub, Some(id))?;
        }
        Ok(())
    }
}

// =============================================================================
// Constant values (with cycle detection)
// =============================================================================

impl Linker {
    fn resolve_const_values(&mut self, modules: &[ast::ModuleSyntax]) -> Result<(), LinkError> {
        // Gather the unresolved right-hand sides first.
        let mut pending: Vec<(ConstId, String, ast::ConstValue, Span)> = Vec::new();
        for module in modules {
            for item in &module.items {
                if let ast::Item::Const(c) = &item.node {
                    let id = self.module(&module.name.node).consts[&c.name.node];
                    pending.push((
                        id,
                        module.name.node.clone(),
                        c.value.node.clone(),
                        c.value.span,
                    ));
                }
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; self.program.consts.len()];

        fn resolve_one(
            program: &mut Program,
            pending: &[(ConstId, String, ast::ConstValue, Span)],
            marks: &mut [Mark],
            id: ConstId,
        ) -> Result<ast::Literal, LinkError> {
            let entry = pending
                .iter()
                .find(|(cid, ..)| *cid == id)
                .expect("registered constant has a pending value");
            let (_, module_name, value, span) = entry;
            match marks[id.index()] {
                Mark::Done => return Ok(program.consts[id.index()].value.clone()),
                Mark::InProgress => {
                    return Err(LinkError::new(
                        format!(
                            "cyclic constant definition: {}",
                            program.consts[id.index()].name
                        ),
                        *span,
                    ))
                }
                Mark::Unvisited => {}
            }
            marks[id.index()] = Mark::InProgress;
            let literal = match value {
                ast::ConstValue::Literal(lit) => lit.clone(),
                ast::ConstValue::Ref(name) => {
                    let module = &program.modules[module_name.as_str()];
                    let Some(target) = module.consts.get(name).copied() else {
                        let suggestion =
                            closest_candidate(name, module.consts.keys().map(String::as_str));
                        return Err(LinkError::unresolved("const", name, suggestion, *span));
                    };
                    resolve_one(program, pending, marks, target)?
                }
            };
            program.consts[id.index()].value = literal.clone();
            marks[id.index()] = Mark::Done;
            Ok(literal)
        }

        for (id, ..) in pending.clone() {
            resolve_one(&mut self.program, &pending, &mut marks, id)?;
        }
        Ok(())
    }
}

// =============================================================================
// Pass 3: bodies
// =============================================================================

impl Linker {
    fn resolve_bodies(&mut self, modules: &[ast::ModuleSyntax]) -> Result<(), LinkError> {
        for module in modules {
            let module_name = module.name.node.clone();
            for item in &module.items {
                match &item.node {
                    ast::Item::Event(e) => {
                        let id = self.module(&module_name).events[&e.name.node];
                        let body = self.resolve_event_body(&module_name, id, e)?;
                        self.program.events[id.index()].body = body;
                    }
                    ast::Item::Transition(t) => {
                        let id = self.module(&module_name).transitions[&t.name.node];
                        let kind = self.resolve_transition_body(&module_name, id, t)?;
                        self.program.transitions[id.index()].kind = kind;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn resolve_event_body(
        &self,
        module_name: &str,
        id: EventId,
        def: &ast::EventDef,
    ) -> Result<EventBody, LinkError> {
        match &def.body {
            ast::EventBody::NoOp => Ok(EventBody::NoOp),
            ast::EventBody::External(name) => Ok(EventBody::External(name.node.clone())),
            ast::EventBody::Composite(call) => {
                if call.target.node == def.name.node {
                    return Err(LinkError::new(
                        format!("cannot expand self: {}", def.name.node),
                        call.target.span,
                    ));
                }
                let module = self.module(module_name);
                let Some(target) = module.events.get(&call.target.node).copied() else {
                    let suggestion = closest_candidate(
                        &call.target.node,
                        module.events.keys().map(String::as_str),
                    );
                    return Err(LinkError::unresolved(
                        "event",
                        &call.target.node,
                        suggestion,
                        call.target.span,
                    ));
                };
                let expected = self.program.event(target).params.len();
                if call.args.len() != expected {
                    return Err(LinkError::arity(
                        &call.target.node,
                        expected,
                        call.args.len(),
                        call.target.span,
                    ));
                }
                let params = self.program.event(id).params.clone();
                let scope = Scope {
                    params: &params,
                    locals: &[],
                };
                let args = self.resolve_args(module_name, &scope, &call.args)?;
                Ok(EventBody::Composite {
                    event: target,
                    args,
                })
            }
        }
    }

    fn resolve_transition_body(
        &self,
        module_name: &str,
        id: TransitionId,
        def: &ast::TransitionDef,
    ) -> Result<TransitionKind, LinkError> {
        match &def.body {
            ast::TransitionBody::Binding(call) => {
                if call.target.node == def.name.node {
                    return Err(LinkError::new(
                        format!("cannot expand self: {}", def.name.node),
                        call.target.span,
                    ));
                }
                let module = self.module(module_name);
                let Some(target) = module.transitions.get(&call.target.node).copied() else {
                    let suggestion = closest_candidate(
                        &call.target.node,
                        module.transitions.keys().map(String::as_str),
                    );
                    return Err(LinkError::unresolved(
                        "transition",
                        &call.target.node,
                        suggestion,
                        call.target.span,
                    ));
                };
                let expected = self.program.transition(target).params.len();
                if call.args.len() != expected {
                    return Err(LinkError::arity(
                        &call.target.node,
                        expected,
                        call.args.len(),
                        call.target.span,
                    ));
                }
                let args = self.resolve_args(module_name, &Scope::EMPTY, &call.args)?;
                Ok(TransitionKind::Binding { target, args })
            }
            ast::TransitionBody::Full(block) => {
                let params = self.program.transition(id).params.clone();
                let mut locals: Vec<LocalDecl> = Vec::new();
                for local in &block.locals {
                    if locals.iter().any(|l| l.name == local.name.node)
                        || params.iter().any(|p| p.name == local.name.node)
                    {
                        return Err(LinkError::new(
                            format!("duplicated local var: {}", local.name.node),
                            local.name.span,
                        ));
                    }
                    let ty =
                        self.resolve_ty(module_name, None, &local.ty, local.name.span)?;
                    locals.push(LocalDecl {
                        name: local.name.node.clone(),
                        ty,
                    });
                }
                let scope = Scope {
                    params: &params,
                    locals: &locals,
                };

                let mut pre_states = Vec::new();
                for m in &block.pre_states {
                    pre_states.push(self.resolve_state_match(module_name, &scope, m)?);
                }
                let mut events = Vec::new();
                for line in &block.events {
                    events.push(self.resolve_event_line(module_name, &scope, line)?);
                }
                let mut post_states = Vec::new();
                for a in &block.post_states {
                    post_states.push(self.resolve_state_assign(module_name, &scope, a)?);
                }
                let error_states = match &block.error_states {
                    Some(assigns) => {
                        let mut resolved = Vec::new();
                        for a in assigns {
                            resolved.push(self.resolve_state_assign(module_name, &scope, a)?);
                        }
                        Some(resolved)
                    }
                    None => None,
                };
                Ok(TransitionKind::Full(TransitionBody {
                    locals,
                    pre_states,
                    events,
                    post_states,
                    error_states,
                }))
            }
        }
    }

    fn lookup_state(
        &self,
        module_name: &str,
        name: &Spanned<String>,
        args: &[Spanned<ast::Expr>],
    ) -> Result<StateId, LinkError> {
        let module = self.module(module_name);
        let Some(id) = module.states.get(&name.node).copied() else {
            let suggestion =
                closest_candidate(&name.node, module.states.keys().map(String::as_str));
            return Err(LinkError::unresolved(
                "state",
                &name.node,
                suggestion,
                name.span,
            ));
        };
        let expected = self.program.state(id).params.len();
        if args.len() != expected {
            return Err(LinkError::arity(&name.node, expected, args.len(), name.span));
        }
        Ok(id)
    }

    fn state_value_index(
        &self,
        state: StateId,
        value: &Spanned<String>,
    ) -> Result<usize, LinkError> {
        let decl = self.program.state(state);
        decl.value_index(&value.node).ok_or_else(|| {
            let suggestion =
                closest_candidate(&value.node, decl.values.iter().map(String::as_str));
            let message = match suggestion {
                Some(candidate) => format!(
                    "invalid value in state {}: {}. Did you mean {candidate}?",
                    decl.name, value.node
                ),
                None => format!("invalid value in state {}: {}", decl.name, value.node),
            };
            LinkError::new(message, value.span)
        })
    }

    fn resolve_state_match(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        m: &ast::StateMatch,
    ) -> Result<StateTest, LinkError> {
        let state = self.lookup_state(module_name, &m.state, &m.args)?;
        let args = self.resolve_args(module_name, scope, &m.args)?;
        let mut allowed = Vec::new();
        for value in &m.values {
            let index = self.state_value_index(state, value)?;
            if allowed.contains(&index) {
                return Err(LinkError::new(
                    format!("duplicated state value: {}", value.node),
                    value.span,
                ));
            }
            allowed.push(index);
        }
        Ok(StateTest {
            state,
            args,
            allowed,
        })
    }

    fn resolve_state_assign(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        a: &ast::StateAssign,
    ) -> Result<StateSet, LinkError> {
        let state = self.lookup_state(module_name, &a.state, &a.args)?;
        let args = self.resolve_args(module_name, scope, &a.args)?;
        let value = self.state_value_index(state, &a.value)?;
        Ok(StateSet { state, args, value })
    }

    fn resolve_endpoint(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        name: &Spanned<String>,
    ) -> Result<Endpoint, LinkError> {
        if let Some((index, param)) = scope.param(&name.node) {
            if param.ty != Ty::Role {
                return Err(LinkError::new(
                    format!("parameter '{}' is not a role", name.node),
                    name.span,
                ));
            }
            return Ok(Endpoint::Param(index));
        }
        let module = self.module(module_name);
        if let Some(id) = module.roles.get(&name.node).copied() {
            return Ok(Endpoint::Role(id));
        }
        let suggestion = closest_candidate(&name.node, module.roles.keys().map(String::as_str));
        Err(LinkError::unresolved(
            "role",
            &name.node,
            suggestion,
            name.span,
        ))
    }

    fn resolve_event_line(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        line: &ast::EventLine,
    ) -> Result<EventStep, LinkError> {
        let source = self.resolve_endpoint(module_name, scope, &line.source)?;
        let target = self.resolve_endpoint(module_name, scope, &line.target)?;
        let module = self.module(module_name);
        let Some(event) = module.events.get(&line.call.target.node).copied() else {
            let suggestion = closest_candidate(
                &line.call.target.node,
                module.events.keys().map(String::as_str),
            );
            return Err(LinkError::unresolved(
                "event",
                &line.call.target.node,
                suggestion,
                line.call.target.span,
            ));
        };
        let expected = self.program.event(event).params.len();
        if line.call.args.len() != expected {
            return Err(LinkError::arity(
                &line.call.target.node,
                expected,
                line.call.args.len(),
                line.call.target.span,
            ));
        }
        let args = self.resolve_args(module_name, scope, &line.call.args)?;
        Ok(EventStep {
            source,
            event,
            args,
            target,
        })
    }

    fn resolve_args(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        args: &[Spanned<ast::Expr>],
    ) -> Result<Vec<Rvalue>, LinkError> {
        args.iter()
            .map(|arg| self.resolve_expr(module_name, scope, arg))
            .collect()
    }

    fn resolve_expr(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        expr: &Spanned<ast::Expr>,
    ) -> Result<Rvalue, LinkError> {
        let span = expr.span;
        match &expr.node {
            ast::Expr::Literal(lit) => Ok(Rvalue::Literal(lit.clone())),
            ast::Expr::Ref(path) => self.resolve_ref(module_name, scope, path, span),
            ast::Expr::RefOut(path) => self.resolve_ref_out(scope, path, span),
            ast::Expr::Qualifier { name, args, out } => {
                self.resolve_qualifier(module_name, scope, name, args, out.as_ref())
            }
            ast::Expr::MessageLiteral { name, fields } => {
                let message = self.resolve_message_name(module_name, None, name)?;
                let body = MessageLiteralBody::Object(self.resolve_field_inits(
                    module_name,
                    scope,
                    message,
                    fields,
                )?);
                Ok(Rvalue::Message(MessageLiteral { message, body }))
            }
            ast::Expr::MessageArray { name, elements } => {
                let message = self.resolve_message_name(module_name, None, name)?;
                let mut resolved = Vec::new();
                for element in elements {
                    resolved.push(self.resolve_field_inits(
                        module_name,
                        scope,
                        message,
                        element,
                    )?);
                }
                Ok(Rvalue::Message(MessageLiteral {
                    message,
                    body: MessageLiteralBody::Array(resolved),
                }))
            }
            ast::Expr::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.resolve_expr(module_name, scope, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Rvalue::Array(items))
            }
            ast::Expr::Struct(_) => Err(LinkError::new(
                "struct literal is only allowed where a message-typed field gives it a type",
                span,
            )),
        }
    }

    fn resolve_ref(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        path: &[String],
        span: Span,
    ) -> Result<Rvalue, LinkError> {
        match path {
            [name] => {
                if let Some((index, _)) = scope.param(name) {
                    return Ok(Rvalue::Param(index));
                }
                if let Some((index, _)) = scope.local(name) {
                    return Ok(Rvalue::Local(index));
                }
                let module = self.module(module_name);
                if let Some(id) = module.consts.get(name).copied() {
                    return Ok(Rvalue::Const(id));
                }
                if let Some(id) = module.roles.get(name).copied() {
                    return Ok(Rvalue::Role(id));
                }
                let candidates = scope
                    .params
                    .iter()
                    .map(|p| p.name.as_str())
                    .chain(scope.locals.iter().map(|l| l.name.as_str()))
                    .chain(module.consts.keys().map(String::as_str))
                    .chain(module.roles.keys().map(String::as_str));
                let suggestion = closest_candidate(name, candidates);
                Err(LinkError::unresolved(
                    "const, role, param, or local var",
                    name,
                    suggestion,
                    span,
                ))
            }
            [base, field] => {
                let endpoint = if let Some((index, param)) = scope.param(base) {
                    if param.ty != Ty::Role {
                        return Err(LinkError::new(
                            format!("parameter '{base}' is not a role"),
                            span,
                        ));
                    }
                    Endpoint::Param(index)
                } else {
                    let module = self.module(module_name);
                    let Some(id) = module.roles.get(base).copied() else {
                        let suggestion =
                            closest_candidate(base, module.roles.keys().map(String::as_str));
                        return Err(LinkError::unresolved("role", base, suggestion, span));
                    };
                    // Unknown fields on a known role are a static error.
                    let role = self.program.role(id);
                    if !role.fields.contains_key(field) {
                        let suggestion =
                            closest_candidate(field, role.fields.keys().map(String::as_str));
                        return Err(LinkError::unresolved(
                            &format!("field in role '{}'", role.name),
                            field,
                            suggestion,
                            span,
                        ));
                    }
                    Endpoint::Role(id)
                };
                Ok(Rvalue::RoleField {
                    base: endpoint,
                    field: field.clone(),
                })
            }
            _ => Err(LinkError::new(
                format!("reference has too many segments: {}", path.join(".")),
                span,
            )),
        }
    }

    fn resolve_ref_out(
        &self,
        scope: &Scope<'_>,
        path: &[String],
        span: Span,
    ) -> Result<Rvalue, LinkError> {
        let [name] = path else {
            return Err(LinkError::new(
                "a reference argument must name a transition-local variable",
                span,
            ));
        };
        if let Some((index, _)) = scope.local(name) {
            return Ok(Rvalue::LocalRef(index));
        }
        if let Some((index, param)) = scope.param(name) {
            if param.by_ref {
                // Forwarding a reference parameter keeps the cell.
                return Ok(Rvalue::Param(index));
            }
            return Err(LinkError::new(
                format!("cannot take a reference to by-value parameter '{name}'"),
                span,
            ));
        }
        Err(LinkError::new(
            format!("cannot find a local var to reference: {name}"),
            span,
        ))
    }

    fn resolve_qualifier(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        name: &Spanned<String>,
        args: &[Spanned<ast::Expr>],
        out: Option<&Spanned<String>>,
    ) -> Result<Rvalue, LinkError> {
        let module = self.module(module_name);
        let Some(qualifier) = module.qualifiers.get(&name.node).copied() else {
            let suggestion =
                closest_candidate(&name.node, module.qualifiers.keys().map(String::as_str));
            return Err(LinkError::unresolved(
                "qualifier",
                &name.node,
                suggestion,
                name.span,
            ));
        };
        let expected = self.program.qualifier(qualifier).params.len();
        if args.len() != expected {
            return Err(LinkError::arity(&name.node, expected, args.len(), name.span));
        }
        let args = self.resolve_args(module_name, scope, args)?;
        let out = match out {
            Some(target) => Some(self.resolve_write_target(scope, target)?),
            None => None,
        };
        Ok(Rvalue::Qualifier {
            qualifier,
            args,
            out,
        })
    }

    fn resolve_write_target(
        &self,
        scope: &Scope<'_>,
        target: &Spanned<String>,
    ) -> Result<WriteTarget, LinkError> {
        if let Some((index, _)) = scope.local(&target.node) {
            return Ok(WriteTarget::Local(index));
        }
        if let Some((index, param)) = scope.param(&target.node) {
            if param.by_ref {
                return Ok(WriteTarget::Param(index));
            }
        }
        Err(LinkError::new(
            format!(
                "qualifier write target must be a transition-local variable: {}",
                target.node
            ),
            target.span,
        ))
    }

    fn resolve_message_name(
        &self,
        module_name: &str,
        enclosing: Option<MessageId>,
        name: &Spanned<String>,
    ) -> Result<MessageId, LinkError> {
        if let Some(enclosing) = enclosing {
            if let Some(id) = self.program.message(enclosing).nested.get(&name.node) {
                return Ok(*id);
            }
        }
        let module = self.module(module_name);
        if let Some(id) = module.messages.get(&name.node).copied() {
            return Ok(id);
        }
        let suggestion =
            closest_candidate(&name.node, module.messages.keys().map(String::as_str));
        Err(LinkError::unresolved(
            "message",
            &name.node,
            suggestion,
            name.span,
        ))
    }

    /// Resolve the field initializers of a message literal.
    ///
    /// Field types provide the context that turns bare struct literals and
    /// arrays into typed message literals. External-schema messages have no
    /// known fields, so their initializers resolve without field checks.
    fn resolve_field_inits(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        message: MessageId,
        inits: &[ast::FieldInit],
    ) -> Result<Vec<(String, Rvalue)>, LinkError> {
        let decl = self.program.message(message);
        let mut resolved: Vec<(String, Rvalue)> = Vec::new();
        for init in inits {
            if resolved.iter().any(|(name, _)| *name == init.name.node) {
                return Err(LinkError::new(
                    format!("cannot set field again: {}", init.name.node),
                    init.name.span,
                ));
            }
            let value = if decl.external.is_some() && decl.fields.is_empty() {
                // Schema-derived field list, unknown until execution.
                self.resolve_expr(module_name, scope, &init.value)?
            } else {
                let Some(field) = decl.field(&init.name.node) else {
                    let suggestion = closest_candidate(
                        &init.name.node,
                        decl.fields.iter().map(|f| f.name.as_str()),
                    );
                    return Err(LinkError::unresolved(
                        &format!("field in message '{}'", decl.name),
                        &init.name.node,
                        suggestion,
                        init.name.span,
                    ));
                };
                self.resolve_field_value(module_name, scope, message, field.clone(), &init.value)?
            };
            resolved.push((init.name.node.clone(), value));
        }
        Ok(resolved)
    }

    fn resolve_field_value(
        &self,
        module_name: &str,
        scope: &Scope<'_>,
        enclosing: MessageId,
        field: FieldDecl,
        expr: &Spanned<ast::Expr>,
    ) -> Result<Rvalue, LinkError> {
        if field.is_repeated() {
            if let ast::Expr::Array(items) = &expr.node {
                let element = FieldDecl {
                    multiplicity: stl_ast::Multiplicity::Required,
                    ..field.clone()
                };
                let items = items
                    .iter()
                    .map(|item| {
                        self.resolve_field_value(
                            module_name,
                            scope,
                            enclosing,
                            element.clone(),
                            item,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Rvalue::Array(items));
            }
            return self.resolve_expr(module_name, scope, expr);
        }
        if let Ty::Message(sub) = field.ty {
            match &expr.node {
                ast::Expr::Struct(inits) => {
                    let body = MessageLiteralBody::Object(self.resolve_field_inits(
                        module_name,
                        scope,
                        sub,
                        inits,
                    )?);
                    return Ok(Rvalue::Message(MessageLiteral { message: sub, body }));
                }
                ast::Expr::MessageLiteral { name, fields } => {
                    let message =
                        self.resolve_message_name(module_name, Some(enclosing), name)?;
                    let body = MessageLiteralBody::Object(self.resolve_field_inits(
                        module_name,
                        scope,
                        message,
                        fields,
                    )?);
                    return Ok(Rvalue::Message(MessageLiteral { message, body }));
                }
                _ => {}
            }
        }
        self.resolve_expr(module_name, scope, expr)
    }
}

// =============================================================================
// Final sweeps
// =============================================================================

impl Linker {
    fn validate_bindings(&self) -> Result<(), LinkError> {
        for decl in &self.program.transitions {
            if let TransitionKind::Binding { target, .. } = &decl.kind {
                let target_decl = self.program.transition(*target);
                if matches!(target_decl.kind, TransitionKind::Binding { .. }) {
                    return Err(LinkError::new(
                        format!(
                            "cannot bind '{}' to another binding: {}",
                            decl.name, target_decl.name
                        ),
                        decl.span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn collect_executables(&mut self) {
        let mut executables = Vec::new();
        for (index, decl) in self.program.transitions.iter().enumerate() {
            if !decl.params.is_empty() {
                continue;
            }
            let id = TransitionId(index as u32);
            match &decl.kind {
                TransitionKind::Full(body) => {
                    if body.events.is_empty() {
                        continue;
                    }
                    executables.push(Executable {
                        name: decl.name.clone(),
                        transition: id,
                        args: Vec::new(),
                        span: decl.span,
                    });
                }
                TransitionKind::Binding { target, args } => {
                    let target_decl = self.program.transition(*target);
                    if let TransitionKind::Full(body) = &target_decl.kind {
                        if body.events.is_empty() {
                            continue;
                        }
                    }
                    executables.push(Executable {
                        name: decl.name.clone(),
                        transition: *target,
                        args: args.clone(),
                        span: decl.span,
                    });
                }
            }
        }
        self.program.executables = executables;
    }

    fn flag_recursive_events(&mut self) {
        let mut recursive = Vec::new();
        for (index, _) in self.program.events.iter().enumerate() {
            let start = EventId(index as u32);
            if self.reaches(start, start, &mut HashSet::new()) {
                warn!(
                    event = %self.program.event(start).name,
                    "composite event is recursive; expansion depth is bounded at run time"
                );
                recursive.push(start);
            }
        }
        self.program.recursive_events = recursive;
    }

    /// Whether `from` reaches `needle` through composite bodies.
    fn reaches(&self, from: EventId, needle: EventId, seen: &mut HashSet<EventId>) -> bool {
        let EventBody::Composite { event, .. } = &self.program.event(from).body else {
            return false;
        };
        if *event == needle {
            return true;
        }
        if !seen.insert(*event) {
            return false;
        }
        self.reaches(*event, needle, seen)
    }
}

fn qualify(module: &str, name: &str) -> String {
    format!("{module}::{name}")
}

fn item_name(item: &ast::Item) -> (String, Span) {
    match item {
        ast::Item::Const(c) => (c.name.node.clone(), c.name.span),
        ast::Item::Role(r) => (r.name.node.clone(), r.name.span),
        ast::Item::State(s) => (s.name.node.clone(), s.name.span),
        ast::Item::Message(m) => (m.name.node.clone(), m.name.span),
        ast::Item::Qualifier(q) => (q.name.node.clone(), q.name.span),
        ast::Item::Event(e) => (e.name.node.clone(), e.name.span),
        ast::Item::Transition(t) => (t.name.node.clone(), t.name.span),
    }
}

fn empty_body() -> TransitionBody {
    TransitionBody {
        locals: Vec::new(),
        pre_states: Vec::new(),
        events: Vec::new(),
        post_states: Vec::new(),
        error_states: None,
    }
}
