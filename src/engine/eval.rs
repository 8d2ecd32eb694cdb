//! Pluggable code evaluation
//!
//! The `function` action and the `expr` set-source execute externally
//! supplied code. The engine only knows the [`CodeEvaluator`] contract:
//! code text in, a scope exposing {log sink, target node, current message,
//! check callback}, value or error out. Sandboxing is the evaluator's
//! concern, not the engine's.

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{Error, Result};
use crate::graph::Message;

/// Bindings exposed to evaluated code
///
/// `check` is only honored when the surrounding action is check-performing.
#[derive(Debug)]
pub struct EvalScope {
    pub node: Option<String>,
    pub msg: Option<Message>,
    logs: Vec<String>,
    check_enabled: bool,
    check: Option<bool>,
}

impl EvalScope {
    pub fn new(node: Option<&str>, msg: Option<&Message>, check_enabled: bool) -> Self {
        Self {
            node: node.map(String::from),
            msg: msg.cloned(),
            logs: Vec::new(),
            check_enabled,
            check: None,
        }
    }

    /// Record a log line for the run's diagnostic stream
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    /// Report a check outcome; a later call overrides an earlier one
    pub fn check(&mut self, ok: bool) {
        if self.check_enabled {
            self.check = Some(ok);
        }
    }

    pub fn take_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.logs)
    }

    pub fn check_outcome(&self) -> Option<bool> {
        self.check
    }
}

/// Evaluator contract for externally supplied code
#[async_trait]
pub trait CodeEvaluator: Send + Sync {
    /// Run `code` against `scope`; the returned value is the evaluation
    /// result (used by the `expr` set-source)
    async fn eval(&self, code: &str, scope: &mut EvalScope) -> Result<Value>;
}

/// Default evaluator: a deliberately small statement language
///
/// Statements are separated by `;` or newlines:
/// - `check(<term> == <term>)`, `check(<term> != <term>)`, `check(<term>)`
/// - `log(<term>)`
/// - a bare `<term>` (its value becomes the evaluation result)
///
/// Terms are JSON literals, `node`, `msg`, or `msg.<path>`.
#[derive(Debug, Default)]
pub struct BasicEvaluator;

#[async_trait]
impl CodeEvaluator for BasicEvaluator {
    async fn eval(&self, code: &str, scope: &mut EvalScope) -> Result<Value> {
        let mut result = Value::Null;
        for statement in code.split(['\n', ';']) {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            result = eval_statement(statement, scope)?;
        }
        Ok(result)
    }
}

fn eval_statement(statement: &str, scope: &mut EvalScope) -> Result<Value> {
    if let Some(inner) = call_body(statement, "check") {
        let ok = eval_condition(inner, scope)?;
        scope.check(ok);
        return Ok(Value::Bool(ok));
    }
    if let Some(inner) = call_body(statement, "log") {
        let value = eval_term(inner, scope)?;
        let line = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        scope.log(line);
        return Ok(Value::Null);
    }
    eval_term(statement, scope)
}

fn call_body<'a>(statement: &'a str, name: &str) -> Option<&'a str> {
    let rest = statement.strip_prefix(name)?.trim_start();
    let rest = rest.strip_prefix('(')?;
    let rest = rest.strip_suffix(')')?;
    Some(rest.trim())
}

fn eval_condition(expr: &str, scope: &EvalScope) -> Result<bool> {
    if let Some((lhs, rhs)) = expr.split_once("==") {
        return Ok(eval_term(lhs.trim(), scope)? == eval_term(rhs.trim(), scope)?);
    }
    if let Some((lhs, rhs)) = expr.split_once("!=") {
        return Ok(eval_term(lhs.trim(), scope)? != eval_term(rhs.trim(), scope)?);
    }
    match eval_term(expr, scope)? {
        Value::Bool(b) => Ok(b),
        other => Err(Error::Eval(format!("'{}' is not a boolean (got {})", expr, other))),
    }
}

fn eval_term(term: &str, scope: &EvalScope) -> Result<Value> {
    let term = term.trim();
    if term == "node" {
        return Ok(scope
            .node
            .as_deref()
            .map(|n| Value::String(n.to_string()))
            .unwrap_or(Value::Null));
    }
    if term == "msg" {
        return Ok(scope
            .msg
            .as_ref()
            .map(|m| Value::Object(m.0.clone()))
            .unwrap_or(Value::Null));
    }
    if let Some(path) = term.strip_prefix("msg.") {
        let msg = scope
            .msg
            .as_ref()
            .ok_or_else(|| Error::Eval(format!("'{}' referenced but no message is current", term)))?;
        return Ok(msg.get_path(path).cloned().unwrap_or(Value::Null));
    }
    serde_json::from_str(term)
        .map_err(|_| Error::Eval(format!("cannot parse term '{}'", term)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn eval(code: &str, scope: &mut EvalScope) -> Result<Value> {
        BasicEvaluator.eval(code, scope).await
    }

    #[tokio::test]
    async fn literal_is_the_result() {
        let mut scope = EvalScope::new(None, None, false);
        assert_eq!(eval("42", &mut scope).await.unwrap(), json!(42));
        assert_eq!(
            eval(r#"{"a": 1}"#, &mut scope).await.unwrap(),
            json!({"a": 1})
        );
    }

    #[tokio::test]
    async fn msg_path_resolves() {
        let msg = Message::with_payload(json!({"a": "b"}));
        let mut scope = EvalScope::new(Some("n1"), Some(&msg), false);
        assert_eq!(eval("msg.payload.a", &mut scope).await.unwrap(), json!("b"));
        assert_eq!(eval("node", &mut scope).await.unwrap(), json!("n1"));
    }

    #[tokio::test]
    async fn check_records_outcome_when_enabled() {
        let msg = Message::with_payload(json!("ok"));
        let mut scope = EvalScope::new(None, Some(&msg), true);
        eval(r#"check(msg.payload == "ok")"#, &mut scope).await.unwrap();
        assert_eq!(scope.check_outcome(), Some(true));

        let mut scope = EvalScope::new(None, Some(&msg), true);
        eval(r#"check(msg.payload == "nope")"#, &mut scope).await.unwrap();
        assert_eq!(scope.check_outcome(), Some(false));
    }

    #[tokio::test]
    async fn check_is_ignored_when_not_check_performing() {
        let mut scope = EvalScope::new(None, None, false);
        eval("check(true)", &mut scope).await.unwrap();
        assert_eq!(scope.check_outcome(), None);
    }

    #[tokio::test]
    async fn log_collects_lines() {
        let mut scope = EvalScope::new(None, None, false);
        eval("log(\"hello\"); log(1)", &mut scope).await.unwrap();
        assert_eq!(scope.take_logs(), vec!["hello".to_string(), "1".to_string()]);
    }

    #[tokio::test]
    async fn bad_term_is_an_eval_error() {
        let mut scope = EvalScope::new(None, None, false);
        let err = eval("not valid", &mut scope).await.unwrap_err();
        assert!(matches!(err, Error::Eval(_)));
    }
}
