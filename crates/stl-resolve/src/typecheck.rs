//! Type checking over a linked program.
//!
//! Arity is already enforced by the linker; this pass validates types:
//! state-argument types, event and qualifier argument types, message-field
//! assignments (including required-field presence and repeated/array shape),
//! reference-parameter call sites, and executable argument values.
//!
//! Integer literals are currently only non-negative; a leading `-` lexes but
//! is rejected here.

use crate::error::TypeError;
use crate::program::*;
use stl_ast::Literal;

pub(crate) fn check(program: &Program) -> Result<(), TypeError> {
    let checker = Checker { program };
    checker.run()
}

struct Checker<'p> {
    program: &'p Program,
}

/// Inferred shape of an rvalue.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Inferred {
    /// `null`; assignable to any field.
    Null,
    /// An array literal; only repeated fields accept one.
    Array,
    Ty(Ty),
}

/// Name scope for one body.
#[derive(Clone, Copy)]
struct Ctx<'a> {
    params: &'a [ParamDecl],
    locals: &'a [LocalDecl],
}

impl<'a> Ctx<'a> {
    const EMPTY: Ctx<'static> = Ctx {
        params: &[],
        locals: &[],
    };
}

impl<'p> Checker<'p> {
    fn run(&self) -> Result<(), TypeError> {
        for decl in &self.program.consts {
            self.check_const(decl)?;
        }
        for role in &self.program.roles {
            for (field, ty) in &role.fields {
                if !matches!(ty, Ty::Bool | Ty::Int | Ty::Str) {
                    return Err(TypeError::new(
                        format!("role '{}', field '{field}'", role.name),
                        "bool, int, or string",
                        self.program.ty_name(ty),
                        role.span,
                    ));
                }
            }
        }
        for qualifier in &self.program.qualifiers {
            for (index, ty) in qualifier.params.iter().enumerate() {
                if *ty == Ty::Role {
                    return Err(TypeError::new(
                        format!("qualifier '{}', param {index}", qualifier.name),
                        "a value type",
                        "role",
                        qualifier.span,
                    ));
                }
            }
        }
        for event in &self.program.events {
            self.check_event(event)?;
        }
        for transition in &self.program.transitions {
            self.check_transition(transition)?;
        }
        for executable in &self.program.executables {
            self.check_executable(executable)?;
        }
        Ok(())
    }

    fn check_const(&self, decl: &Const) -> Result<(), TypeError> {
        let context = format!("const '{}'", decl.name);
        let actual = match &decl.value {
            Literal::Int(v) => {
                if *v < 0 {
                    return Err(TypeError::new(
                        context,
                        "a non-negative integer",
                        format!("{v}"),
                        decl.span,
                    ));
                }
                Ty::Int
            }
            Literal::Bool(_) => Ty::Bool,
            Literal::Str(_) => Ty::Str,
            Literal::Null => {
                return Err(TypeError::new(context, "a literal value", "null", decl.span))
            }
        };
        if actual != decl.ty {
            return Err(TypeError::new(
                context,
                self.program.ty_name(&decl.ty),
                self.program.ty_name(&actual),
                decl.span,
            ));
        }
        Ok(())
    }

    fn check_event(&self, decl: &EventDecl) -> Result<(), TypeError> {
        for param in &decl.params {
            if param.by_ref && param.ty == Ty::Role {
                return Err(TypeError::new(
                    format!("event '{}', param '{}'", decl.name, param.name),
                    "a value type for the reference parameter",
                    "role",
                    decl.span,
                ));
            }
        }
        if let EventBody::Composite { event, args } = &decl.body {
            let ctx = Ctx {
                params: &decl.params,
                locals: &[],
            };
            let target = self.program.event(*event);
            self.check_call_args(
                &ctx,
                &format!("event '{}', call of '{}'", decl.name, target.name),
                &target.params,
                args,
                decl.span,
            )?;
        }
        Ok(())
    }

    fn check_transition(&self, decl: &TransitionDecl) -> Result<(), TypeError> {
        let TransitionKind::Full(body) = &decl.kind else {
            return self.check_binding(decl);
        };
        let ctx = Ctx {
            params: &decl.params,
            locals: &body.locals,
        };
        for (index, test) in body.pre_states.iter().enumerate() {
            let context = format!("transition '{}', pre_states[{index}]", decl.name);
            self.check_state_args(&ctx, &context, test.state, &test.args, decl.span)?;
        }
        for (index, step) in body.events.iter().enumerate() {
            let event = self.program.event(step.event);
            let context = format!(
                "transition '{}', event {index} ('{}')",
                decl.name, event.name
            );
            self.check_call_args(&ctx, &context, &event.params, &step.args, decl.span)?;
        }
        for (index, set) in body.post_states.iter().enumerate() {
            let context = format!("transition '{}', post_states[{index}]", decl.name);
            self.check_state_args(&ctx, &context, set.state, &set.args, decl.span)?;
        }
        if let Some(error_states) = &body.error_states {
            for (index, set) in error_states.iter().enumerate() {
                let context = format!("transition '{}', error_states[{index}]", decl.name);
                self.check_state_args(&ctx, &context, set.state, &set.args, decl.span)?;
            }
        }
        Ok(())
    }

    fn check_binding(&self, decl: &TransitionDecl) -> Result<(), TypeError> {
        let TransitionKind::Binding { target, args } = &decl.kind else {
            return Ok(());
        };
        let target_decl = self.program.transition(*target);
        let context = format!("transition '{}'", decl.name);
        for (param, arg) in target_decl.params.iter().zip(args) {
            if !matches!(
                arg,
                Rvalue::Literal(_) | Rvalue::Const(_) | Rvalue::Role(_)
            ) {
                return Err(TypeError::new(
                    format!("{context}, argument for '{}'", param.name),
                    "a literal, constant, or role",
                    "a computed value",
                    decl.span,
                ));
            }
            self.check_value(
                &Ctx::EMPTY,
                &format!("{context}, argument for '{}'", param.name),
                arg,
                &param.ty,
                decl.span,
            )?;
        }
        Ok(())
    }

    fn check_executable(&self, executable: &Executable) -> Result<(), TypeError> {
        let transition = self.program.transition(executable.transition);
        for (param, arg) in transition.params.iter().zip(&executable.args) {
            self.check_value(
                &Ctx::EMPTY,
                &format!(
                    "transition binding '{}', argument for '{}'",
                    executable.name, param.name
                ),
                arg,
                &param.ty,
                executable.span,
            )?;
        }
        Ok(())
    }

    /// State arguments must be scalar and match the declared parameter types.
    fn check_state_args(
        &self,
        ctx: &Ctx<'_>,
        context: &str,
        state: StateId,
        args: &[Rvalue],
        span: stl_ast::Span,
    ) -> Result<(), TypeError> {
        let decl = self.program.state(state);
        for (index, (arg, expected)) in args.iter().zip(&decl.params).enumerate() {
            if matches!(
                arg,
                Rvalue::Qualifier { .. } | Rvalue::Message(_) | Rvalue::Array(_)
            ) {
                return Err(TypeError::new(
                    format!("{context}, argument {index}"),
                    "a scalar value",
                    "a composite value",
                    span,
                ));
            }
            self.check_value(
                ctx,
                &format!("{context}, argument {index}"),
                arg,
                expected,
                span,
            )?;
        }
        Ok(())
    }

    /// Check call arguments against declared parameters, including the
    /// reference-parameter rule: a `&` parameter only accepts a
    /// transition-local lvalue (or a forwarded reference parameter) of the
    /// identical type.
    fn check_call_args(
        &self,
        ctx: &Ctx<'_>,
        context: &str,
        params: &[ParamDecl],
        args: &[Rvalue],
        span: stl_ast::Span,
    ) -> Result<(), TypeError> {
        for (param, arg) in params.iter().zip(args) {
            let context = format!("{context}, argument for '{}'", param.name);
            if param.by_ref {
                let actual = match arg {
                    Rvalue::LocalRef(index) => ctx.locals[*index].ty,
                    Rvalue::Param(index) if ctx.params[*index].by_ref => {
                        ctx.params[*index].ty
                    }
                    _ => {
                        return Err(TypeError::new(
                            context,
                            "a reference to a transition-local variable",
                            "a value",
                            span,
                        ))
                    }
                };
                if actual != param.ty {
                    return Err(TypeError::new(
                        context,
                        self.program.ty_name(&param.ty),
                        self.program.ty_name(&actual),
                        span,
                    ));
                }
            } else {
                self.check_value(ctx, &context, arg, &param.ty, span)?;
            }
        }
        Ok(())
    }

    /// Check a value against an expected type.
    fn check_value(
        &self,
        ctx: &Ctx<'_>,
        context: &str,
        rv: &Rvalue,
        expected: &Ty,
        span: stl_ast::Span,
    ) -> Result<(), TypeError> {
        match self.infer(ctx, context, rv, span)? {
            Inferred::Null => Ok(()),
            Inferred::Array => Err(TypeError::new(
                context,
                self.program.ty_name(expected),
                "an array",
                span,
            )),
            Inferred::Ty(actual) => {
                // A message value may stand in for a string field; it is
                // encoded on evaluation.
                let compatible = actual == *expected
                    || (*expected == Ty::Str && matches!(actual, Ty::Message(_)));
                if compatible {
                    Ok(())
                } else {
                    Err(TypeError::new(
                        context,
                        self.program.ty_name(expected),
                        self.program.ty_name(&actual),
                        span,
                    ))
                }
            }
        }
    }

    /// Infer an rvalue's type, checking its subtrees along the way.
    fn infer(
        &self,
        ctx: &Ctx<'_>,
        context: &str,
        rv: &Rvalue,
        span: stl_ast::Span,
    ) -> Result<Inferred, TypeError> {
        match rv {
            Rvalue::Literal(Literal::Int(v)) => {
                if *v < 0 {
                    return Err(TypeError::new(
                        context,
                        "a non-negative integer",
                        format!("{v}"),
                        span,
                    ));
                }
                Ok(Inferred::Ty(Ty::Int))
            }
            Rvalue::Literal(Literal::Bool(_)) => Ok(Inferred::Ty(Ty::Bool)),
            Rvalue::Literal(Literal::Str(_)) => Ok(Inferred::Ty(Ty::Str)),
            Rvalue::Literal(Literal::Null) => Ok(Inferred::Null),
            Rvalue::Const(id) => Ok(Inferred::Ty(self.program.const_decl(*id).ty)),
            Rvalue::Param(index) => Ok(Inferred::Ty(ctx.params[*index].ty)),
            Rvalue::Local(index) | Rvalue::LocalRef(index) => {
                Ok(Inferred::Ty(ctx.locals[*index].ty))
            }
            Rvalue::Role(_) => Ok(Inferred::Ty(Ty::Role)),
            Rvalue::RoleField { base, field } => match base {
                Endpoint::Role(id) => {
                    let role = self.program.role(*id);
                    let ty = role.fields.get(field).copied().unwrap_or(Ty::Str);
                    Ok(Inferred::Ty(ty))
                }
                // The concrete role behind a role parameter is unknown until
                // run time; so is the field type.
                Endpoint::Param(_) => Ok(Inferred::Null),
            },
            Rvalue::Qualifier {
                qualifier,
                args,
                out,
            } => {
                let decl = self.program.qualifier(*qualifier);
                for (index, (arg, expected)) in args.iter().zip(&decl.params).enumerate() {
                    self.check_value(
                        ctx,
                        &format!("{context}, qualifier '{}', argument {index}", decl.name),
                        arg,
                        expected,
                        span,
                    )?;
                }
                if let Some(target) = out {
                    let target_ty = match target {
                        WriteTarget::Local(index) => ctx.locals[*index].ty,
                        WriteTarget::Param(index) => ctx.params[*index].ty,
                    };
                    if target_ty != decl.ret {
                        return Err(TypeError::new(
                            format!("{context}, qualifier '{}' write target", decl.name),
                            self.program.ty_name(&decl.ret),
                            self.program.ty_name(&target_ty),
                            span,
                        ));
                    }
                }
                Ok(Inferred::Ty(decl.ret))
            }
            Rvalue::Message(literal) => {
                self.check_message_literal(ctx, context, literal, span)?;
                Ok(Inferred::Ty(Ty::Message(literal.message)))
            }
            Rvalue::Array(items) => {
                for item in items {
                    self.infer(ctx, context, item, span)?;
                }
                Ok(Inferred::Array)
            }
        }
    }

    fn check_message_literal(
        &self,
        ctx: &Ctx<'_>,
        context: &str,
        literal: &MessageLiteral,
        span: stl_ast::Span,
    ) -> Result<(), TypeError> {
        let decl = self.program.message(literal.message);
        let context = format!("{context}, message '{}'", decl.name);

        // Schema-derived messages carry no link-time field list; field
        // checking happens in the codec. Still walk the values.
        if decl.external.is_some() && decl.fields.is_empty() {
            match &literal.body {
                MessageLiteralBody::Object(fields) => {
                    for (_, rv) in fields {
                        self.infer(ctx, &context, rv, span)?;
                    }
                }
                MessageLiteralBody::Array(elements) => {
                    for element in elements {
                        for (_, rv) in element {
                            self.infer(ctx, &context, rv, span)?;
                        }
                    }
                }
            }
            return Ok(());
        }

        match &literal.body {
            MessageLiteralBody::Object(fields) => {
                if decl.is_array {
                    return Err(TypeError::new(
                        context,
                        "an array literal",
                        "an object literal",
                        span,
                    ));
                }
                self.check_literal_fields(ctx, &context, decl, fields, span)
            }
            MessageLiteralBody::Array(elements) => {
                if !decl.is_array {
                    return Err(TypeError::new(
                        context,
                        "an object literal",
                        "an array literal",
                        span,
                    ));
                }
                for element in elements {
                    self.check_literal_fields(ctx, &context, decl, element, span)?;
                }
                Ok(())
            }
        }
    }

    fn check_literal_fields(
        &self,
        ctx: &Ctx<'_>,
        context: &str,
        decl: &MessageDecl,
        fields: &[(String, Rvalue)],
        span: stl_ast::Span,
    ) -> Result<(), TypeError> {
        for field_decl in &decl.fields {
            if field_decl.is_required()
                && !fields.iter().any(|(name, _)| *name == field_decl.name)
            {
                return Err(TypeError::new(
                    context,
                    format!("required field '{}'", field_decl.name),
                    "no value",
                    span,
                ));
            }
        }
        for (name, rv) in fields {
            let field = decl
                .field(name)
                .expect("linker verified the field exists");
            let context = format!("{context}, field '{name}'");
            if field.is_repeated() {
                match rv {
                    Rvalue::Array(items) => {
                        for item in items {
                            self.check_value(ctx, &context, item, &field.ty, span)?;
                        }
                    }
                    Rvalue::Literal(Literal::Null) => {}
                    _ => {
                        return Err(TypeError::new(
                            context,
                            "a value list",
                            "a single value",
                            span,
                        ))
                    }
                }
            } else {
                self.check_value(ctx, &context, rv, &field.ty, span)?;
            }
        }
        Ok(())
    }
}
