//! Incremental construction of the feedback tree from judge output.
//!
//! The judge writes newline-delimited JSON commands describing a nested
//! judgement (judgement > tab > context > testcase > test), or a single
//! full result object as its entire output. The constructor consumes
//! that stream in arrival order and produces exactly one immutable
//! result, aggregating acceptance bottom-up and escalating the overall
//! status monotonically.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::JudgeError;
use crate::feedback::{Annotation, Context, JudgeResult, Message, Tab, Test, Testcase};
use crate::status::{Locale, Status, StatusPair};

/// One partial-output command from the judge.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
enum Command {
    StartJudgement,
    StartTab {
        title: Option<String>,
        permission: Option<String>,
        hidden: Option<bool>,
    },
    StartContext {
        description: Option<Message>,
    },
    StartTestcase {
        description: Option<Message>,
    },
    StartTest {
        expected: Option<String>,
        channel: Option<String>,
        description: Option<Message>,
    },
    AppendMessage {
        message: Message,
    },
    AnnotateCode {
        row: u64,
        rows: Option<u64>,
        column: Option<u64>,
        columns: Option<u64>,
        text: String,
        #[serde(rename = "type")]
        severity: Option<String>,
    },
    EscalateStatus {
        status: StatusPair,
    },
    CloseTest {
        generated: Option<String>,
        status: StatusPair,
        accepted: Option<bool>,
    },
    CloseTestcase {
        accepted: Option<bool>,
    },
    CloseContext {
        accepted: Option<bool>,
    },
    CloseTab {
        #[serde(rename = "badgeCount")]
        badge_count: Option<u64>,
    },
    CloseJudgement {
        accepted: Option<bool>,
        status: Option<StatusPair>,
    },
}

/// Root node while the judgement is open.
#[derive(Debug, Default)]
struct Judgement {
    groups: Vec<Tab>,
    messages: Vec<Message>,
    annotations: Vec<Annotation>,
}

/// An open node on the parse stack. Nodes are opened in command order
/// and must be closed in LIFO order; a close against a different kind of
/// node is a protocol error.
#[derive(Debug)]
enum OpenNode {
    Tab(Tab),
    Context(Context),
    Testcase(Testcase),
    Test(Test),
}

impl OpenNode {
    fn kind(&self) -> &'static str {
        match self {
            OpenNode::Tab(_) => "tab",
            OpenNode::Context(_) => "context",
            OpenNode::Testcase(_) => "testcase",
            OpenNode::Test(_) => "test",
        }
    }
}

/// First escalation keeps its description; later escalations may only
/// worsen the status.
#[derive(Debug)]
struct Escalation {
    status: Status,
    description: String,
}

/// Streaming parser for judge output.
pub struct ResultConstructor {
    locale: Locale,
    judgement: Option<Judgement>,
    stack: Vec<OpenNode>,
    escalation: Option<Escalation>,
    /// Set when the judge emitted a full result object instead of
    /// partial commands.
    full: Option<JudgeResult>,
    /// Set by `close-judgement`.
    closed: Option<JudgeResult>,
    saw_partial: bool,
}

impl ResultConstructor {
    pub fn new(locale: Locale) -> Self {
        Self {
            locale,
            judgement: None,
            stack: Vec::new(),
            escalation: None,
            full: None,
            closed: None,
            saw_partial: false,
        }
    }

    /// Feed a chunk of judge output. A chunk may contain any number of
    /// concatenated or newline-separated JSON values.
    pub fn feed(&mut self, chunk: &str) -> Result<(), JudgeError> {
        let stream = serde_json::Deserializer::from_str(chunk).into_iter::<Value>();
        for value in stream {
            let value = value.map_err(|e| {
                JudgeError::protocol("Failed to parse judge output as JSON", e.to_string())
            })?;
            self.apply(value)?;
        }
        Ok(())
    }

    /// Finish the parse and hand out the result.
    ///
    /// With `timeout` set, any still-open nodes are force-closed with
    /// their default aggregation rules and the judgement gets a terminal
    /// `time limit exceeded` status; the untrusted process was killed,
    /// so no matching close commands will ever arrive.
    pub fn result(mut self, timeout: bool) -> Result<JudgeResult, JudgeError> {
        if let Some(full) = self.full.take() {
            return Ok(full);
        }

        if timeout && self.judgement.is_some() {
            debug!("Force-closing {} open protocol nodes after timeout", self.stack.len());
            self.force_close_open_nodes()?;
        }

        if let Some(closed) = self.closed.take() {
            return Ok(closed);
        }
        if self.judgement.is_some() {
            return Err(JudgeError::protocol(
                "Judgement was never closed",
                "the judge exited without a close-judgement command",
            ));
        }
        Err(JudgeError::protocol(
            "No judge output",
            "the submission produced no judge result",
        ))
    }

    fn apply(&mut self, value: Value) -> Result<(), JudgeError> {
        let object = value.as_object().ok_or_else(|| {
            JudgeError::protocol("Judge output is not a JSON object", value.to_string())
        })?;

        if object.contains_key("command") {
            if self.full.is_some() {
                return Err(JudgeError::protocol(
                    "Mixed judge output",
                    "partial command received after a full result object",
                ));
            }
            self.saw_partial = true;
            let command: Command = serde_json::from_value(value).map_err(|e| {
                JudgeError::protocol("Unknown or malformed judge command", e.to_string())
            })?;
            self.execute(command)
        } else if object.contains_key("accepted") && object.contains_key("status") {
            if self.saw_partial {
                return Err(JudgeError::protocol(
                    "Mixed judge output",
                    "full result object received while a partial stream is open",
                ));
            }
            // A later full object fully overwrites an earlier one.
            let result: JudgeResult = serde_json::from_value(value).map_err(|e| {
                JudgeError::protocol("Judge output does not match the result schema", e.to_string())
            })?;
            self.full = Some(result);
            Ok(())
        } else {
            Err(JudgeError::protocol(
                "Judge output is neither a command nor a result",
                value.to_string(),
            ))
        }
    }

    fn execute(&mut self, command: Command) -> Result<(), JudgeError> {
        match command {
            Command::StartJudgement => {
                if self.judgement.is_some() || self.closed.is_some() {
                    return Err(JudgeError::protocol(
                        "Invalid start-judgement",
                        "a judgement was already started",
                    ));
                }
                self.judgement = Some(Judgement::default());
                Ok(())
            }
            Command::StartTab { title, permission, hidden } => {
                self.require_judgement()?;
                if let Some(open) = self.stack.last() {
                    return Err(JudgeError::protocol(
                        "Invalid start-tab",
                        format!("a {} is still open", open.kind()),
                    ));
                }
                self.stack.push(OpenNode::Tab(Tab {
                    description: title,
                    permission,
                    hidden,
                    ..Default::default()
                }));
                Ok(())
            }
            Command::StartContext { description } => {
                match self.stack.last() {
                    Some(OpenNode::Tab(_)) => {}
                    _ => {
                        return Err(JudgeError::protocol(
                            "Invalid start-context",
                            "no tab is open",
                        ))
                    }
                }
                self.stack.push(OpenNode::Context(Context {
                    description,
                    ..Default::default()
                }));
                Ok(())
            }
            Command::StartTestcase { description } => {
                match self.stack.last() {
                    Some(OpenNode::Context(_)) => {}
                    _ => {
                        return Err(JudgeError::protocol(
                            "Invalid start-testcase",
                            "no context is open",
                        ))
                    }
                }
                self.stack.push(OpenNode::Testcase(Testcase {
                    description,
                    ..Default::default()
                }));
                Ok(())
            }
            Command::StartTest { expected, channel, description } => {
                match self.stack.last() {
                    Some(OpenNode::Testcase(_)) => {}
                    _ => {
                        return Err(JudgeError::protocol(
                            "Invalid start-test",
                            "no testcase is open",
                        ))
                    }
                }
                self.stack.push(OpenNode::Test(Test {
                    expected,
                    channel,
                    description,
                    ..Default::default()
                }));
                Ok(())
            }
            Command::AppendMessage { message } => self.append_message(message),
            Command::AnnotateCode { row, rows, column, columns, text, severity } => {
                let judgement = self.judgement.as_mut().ok_or_else(|| {
                    JudgeError::protocol("Invalid annotate-code", "no judgement is open")
                })?;
                judgement.annotations.push(Annotation {
                    row,
                    rows,
                    column,
                    columns,
                    text,
                    severity,
                });
                Ok(())
            }
            Command::EscalateStatus { status } => {
                self.require_judgement()?;
                self.escalate(status);
                Ok(())
            }
            Command::CloseTest { generated, status, accepted } => {
                self.close_test(generated, status, accepted)
            }
            Command::CloseTestcase { accepted } => self.close_testcase(accepted),
            Command::CloseContext { accepted } => self.close_context(accepted),
            Command::CloseTab { badge_count } => self.close_tab(badge_count),
            Command::CloseJudgement { accepted, status } => self.close_judgement(accepted, status),
        }
    }

    fn require_judgement(&self) -> Result<(), JudgeError> {
        if self.judgement.is_none() {
            return Err(JudgeError::protocol("Invalid command", "no judgement is open"));
        }
        Ok(())
    }

    fn append_message(&mut self, message: Message) -> Result<(), JudgeError> {
        if let Some(open) = self.stack.last_mut() {
            let messages = match open {
                OpenNode::Tab(tab) => &mut tab.messages,
                OpenNode::Context(context) => &mut context.messages,
                OpenNode::Testcase(testcase) => &mut testcase.messages,
                OpenNode::Test(test) => &mut test.messages,
            };
            messages.push(message);
            return Ok(());
        }
        match self.judgement.as_mut() {
            Some(judgement) => {
                judgement.messages.push(message);
                Ok(())
            }
            None => Err(JudgeError::protocol("Invalid append-message", "no node is open")),
        }
    }

    fn escalate(&mut self, status: StatusPair) {
        match &mut self.escalation {
            None => {
                let description = status
                    .human
                    .unwrap_or_else(|| status.value.human(self.locale).to_string());
                self.escalation = Some(Escalation { status: status.value, description });
            }
            Some(escalation) if status.value > escalation.status => {
                // Status worsens, but the first escalation's description
                // stays.
                escalation.status = status.value;
            }
            Some(_) => {}
        }
    }

    fn close_test(
        &mut self,
        generated: Option<String>,
        status: StatusPair,
        accepted: Option<bool>,
    ) -> Result<(), JudgeError> {
        let mut test = match self.stack.pop() {
            Some(OpenNode::Test(test)) => test,
            other => return Err(self.mismatched_close("close-test", other)),
        };
        test.generated = generated;
        test.accepted = Some(accepted.unwrap_or(status.value == Status::Correct));
        test.status = Some(status.value);
        match self.stack.last_mut() {
            Some(OpenNode::Testcase(testcase)) => {
                testcase.tests.push(test);
                Ok(())
            }
            _ => Err(JudgeError::protocol("Invalid close-test", "no testcase is open")),
        }
    }

    fn close_testcase(&mut self, accepted: Option<bool>) -> Result<(), JudgeError> {
        let mut testcase = match self.stack.pop() {
            Some(OpenNode::Testcase(testcase)) => testcase,
            other => return Err(self.mismatched_close("close-testcase", other)),
        };
        let aggregated = testcase.tests.iter().all(|test| test.accepted.unwrap_or(true));
        testcase.accepted = Some(accepted.unwrap_or(aggregated));
        match self.stack.last_mut() {
            Some(OpenNode::Context(context)) => {
                context.groups.push(testcase);
                Ok(())
            }
            _ => Err(JudgeError::protocol("Invalid close-testcase", "no context is open")),
        }
    }

    fn close_context(&mut self, accepted: Option<bool>) -> Result<(), JudgeError> {
        let mut context = match self.stack.pop() {
            Some(OpenNode::Context(context)) => context,
            other => return Err(self.mismatched_close("close-context", other)),
        };
        let aggregated = context
            .groups
            .iter()
            .all(|testcase| testcase.accepted.unwrap_or(true));
        context.accepted = Some(accepted.unwrap_or(aggregated));
        match self.stack.last_mut() {
            Some(OpenNode::Tab(tab)) => {
                tab.groups.push(context);
                Ok(())
            }
            _ => Err(JudgeError::protocol("Invalid close-context", "no tab is open")),
        }
    }

    fn close_tab(&mut self, badge_count: Option<u64>) -> Result<(), JudgeError> {
        let mut tab = match self.stack.pop() {
            Some(OpenNode::Tab(tab)) => tab,
            other => return Err(self.mismatched_close("close-tab", other)),
        };
        // Computed once at close, from final child state.
        tab.badge_count = Some(badge_count.unwrap_or_else(|| tab.failed_testcases()));
        match self.judgement.as_mut() {
            Some(judgement) => {
                judgement.groups.push(tab);
                Ok(())
            }
            None => Err(JudgeError::protocol("Invalid close-tab", "no judgement is open")),
        }
    }

    fn close_judgement(
        &mut self,
        accepted: Option<bool>,
        status: Option<StatusPair>,
    ) -> Result<(), JudgeError> {
        if let Some(open) = self.stack.last() {
            return Err(JudgeError::protocol(
                "Invalid close-judgement",
                format!("a {} is still open", open.kind()),
            ));
        }
        let judgement = self.judgement.take().ok_or_else(|| {
            JudgeError::protocol("Invalid close-judgement", "no judgement is open")
        })?;

        let accepted = accepted.unwrap_or_else(|| judgement.groups.iter().all(Tab::is_accepted));
        let (status, description) = self.resolve_status(accepted, status);

        self.closed = Some(JudgeResult {
            accepted,
            status,
            description: Some(description),
            groups: judgement.groups,
            messages: judgement.messages,
            annotations: judgement.annotations,
            runtime_metrics: None,
        });
        Ok(())
    }

    /// Final status resolution: an explicit close status always wins,
    /// then the escalated status (with the first escalation's sticky
    /// description), then a status derived from acceptance.
    fn resolve_status(&mut self, accepted: bool, close: Option<StatusPair>) -> (Status, String) {
        if let Some(pair) = close {
            let description = pair
                .human
                .unwrap_or_else(|| pair.value.human(self.locale).to_string());
            return (pair.value, description);
        }
        if let Some(escalation) = self.escalation.take() {
            return (escalation.status, escalation.description);
        }
        let derived = if accepted { Status::Correct } else { Status::Wrong };
        (derived, derived.human(self.locale).to_string())
    }

    /// Close every open node with its default aggregation and end the
    /// judgement with a `time limit exceeded` status.
    fn force_close_open_nodes(&mut self) -> Result<(), JudgeError> {
        while let Some(open) = self.stack.last() {
            match open {
                // The killed test never produced output.
                OpenNode::Test(_) => self.close_test(
                    None,
                    StatusPair { value: Status::TimeLimitExceeded, human: None },
                    Some(false),
                )?,
                OpenNode::Testcase(_) => self.close_testcase(None)?,
                OpenNode::Context(_) => self.close_context(None)?,
                OpenNode::Tab(_) => self.close_tab(None)?,
            }
        }
        let status = StatusPair {
            value: Status::TimeLimitExceeded,
            human: Some(Status::TimeLimitExceeded.human(self.locale).to_string()),
        };
        self.close_judgement(Some(false), Some(status))
    }

    fn mismatched_close(&self, command: &str, popped: Option<OpenNode>) -> JudgeError {
        match popped {
            Some(open) => JudgeError::protocol(
                format!("Invalid {}", command),
                format!("the innermost open node is a {}", open.kind()),
            ),
            None => JudgeError::protocol(format!("Invalid {}", command), "no node is open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn construct(food: &[&str]) -> Result<JudgeResult, JudgeError> {
        construct_with(food, Locale::En, false)
    }

    fn construct_with(
        food: &[&str],
        locale: Locale,
        timeout: bool,
    ) -> Result<JudgeResult, JudgeError> {
        let mut constructor = ResultConstructor::new(locale);
        for chunk in food {
            constructor.feed(chunk)?;
        }
        constructor.result(timeout)
    }

    #[test]
    fn test_empty_output_fails() {
        assert!(construct(&[""]).is_err());
    }

    #[test]
    fn test_empty_json_fails() {
        assert!(construct(&["{}"]).is_err());
    }

    #[test]
    fn test_invalid_json_fails() {
        assert!(construct(&["{ Aaargh"]).is_err());
    }

    #[test]
    fn test_minimal_full_schema_is_accepted() {
        let result = construct(&[r#"{ "accepted": true, "status": "correct" }"#]).unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "accepted": true, "status": "correct" })
        );
    }

    #[test]
    fn test_second_full_schema_overwrites_the_first() {
        let result = construct(&[
            r#"{ "accepted": true, "status": "correct" }{ "accepted": false, "status": "wrong" }"#,
        ])
        .unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "accepted": false, "status": "wrong" })
        );
    }

    #[test]
    fn test_full_schema_after_partial_commands_fails() {
        let mut constructor = ResultConstructor::new(Locale::En);
        constructor.feed(r#"{ "command": "start-judgement" }"#).unwrap();
        let err = constructor.feed(r#"{ "accepted": true, "status": "correct" }"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_partial_command_after_full_schema_fails() {
        let mut constructor = ResultConstructor::new(Locale::En);
        constructor
            .feed(r#"{ "accepted": true, "status": "correct" }"#)
            .unwrap();
        assert!(constructor.feed(r#"{ "command": "start-judgement" }"#).is_err());
    }

    #[test]
    fn test_empty_judgement_defaults_to_correct() {
        let result = construct(&[
            r#"{ "command": "start-judgement" }"#,
            r#"{ "command": "close-judgement" }"#,
        ])
        .unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "accepted": true, "status": "correct", "description": "Correct" })
        );
    }

    #[test]
    fn test_partial_output_accumulates_status() {
        let result = construct(&[
            r#"{ "command": "start-judgement" }"#,
            r#"{ "command": "start-tab", "title": "Tab One" }"#,
            r#"{ "command": "start-context" }"#,
            r#"{ "command": "start-testcase", "description": "case 1" }"#,
            r#"{ "command": "start-test", "expected": "SOMETHING" }"#,
            r#"{ "command": "close-test", "generated": "SOMETHING", "status": { "enum": "correct", "human": "Correct" } }"#,
            r#"{ "command": "close-testcase" }"#,
            r#"{ "command": "close-context" }"#,
            r#"{ "command": "start-context" }"#,
            r#"{ "command": "start-testcase", "description": "case 2" }"#,
            r#"{ "command": "start-test", "expected": "SOMETHING" }"#,
            r#"{ "command": "close-test", "generated": "ELSE", "status": { "enum": "wrong", "human": "Wrong" } }"#,
            r#"{ "command": "close-testcase" }"#,
            r#"{ "command": "close-context" }"#,
            r#"{ "command": "close-tab" }"#,
            r#"{ "command": "close-judgement" }"#,
        ])
        .unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "accepted": false,
                "status": "wrong",
                "description": "Wrong",
                "groups": [{
                    "description": "Tab One",
                    "badgeCount": 1,
                    "groups": [{
                        "accepted": true,
                        "groups": [{
                            "description": "case 1",
                            "accepted": true,
                            "tests": [{
                                "expected": "SOMETHING",
                                "generated": "SOMETHING",
                                "accepted": true,
                                "status": "correct"
                            }]
                        }]
                    }, {
                        "accepted": false,
                        "groups": [{
                            "description": "case 2",
                            "accepted": false,
                            "tests": [{
                                "expected": "SOMETHING",
                                "generated": "ELSE",
                                "accepted": false,
                                "status": "wrong"
                            }]
                        }]
                    }]
                }]
            })
        );
    }

    #[test]
    fn test_fully_nested_accepted_scenario_is_accepted_at_every_level() {
        let result = construct(&[
            r#"{ "command": "start-judgement" }"#,
            r#"{ "command": "start-tab", "title": "Feedback" }"#,
            r#"{ "command": "start-context" }"#,
            r#"{ "command": "start-testcase", "description": "case" }"#,
            r#"{ "command": "start-test", "expected": "X" }"#,
            r#"{ "command": "close-test", "generated": "X", "status": { "enum": "correct" } }"#,
            r#"{ "command": "close-testcase" }"#,
            r#"{ "command": "close-context" }"#,
            r#"{ "command": "close-tab" }"#,
            r#"{ "command": "close-judgement" }"#,
        ])
        .unwrap();
        assert!(result.accepted);
        assert_eq!(result.status, Status::Correct);
        let tab = &result.groups[0];
        assert_eq!(tab.badge_count, Some(0));
        let context = &tab.groups[0];
        assert_eq!(context.accepted, Some(true));
        let testcase = &context.groups[0];
        assert_eq!(testcase.accepted, Some(true));
        assert_eq!(testcase.tests[0].accepted, Some(true));
    }

    #[test]
    fn test_messages_attach_to_every_level() {
        let result = construct(&[
            r#"{ "command": "start-judgement" }"#,
            r#"{ "command": "append-message", "message": "judgement" }"#,
            r#"{ "command": "start-tab", "title": "Tab One" }"#,
            r#"{ "command": "append-message", "message": "tab" }"#,
            r#"{ "command": "start-context" }"#,
            r#"{ "command": "append-message", "message": "context" }"#,
            r#"{ "command": "start-testcase", "description": "case 1" }"#,
            r#"{ "command": "append-message", "message": "testcase" }"#,
            r#"{ "command": "start-test", "expected": "SOMETHING" }"#,
            r#"{ "command": "append-message", "message": "test" }"#,
            r#"{ "command": "close-test", "generated": "SOMETHING", "status": { "enum": "correct" } }"#,
            r#"{ "command": "close-testcase" }"#,
            r#"{ "command": "close-context" }"#,
            r#"{ "command": "close-tab" }"#,
            r#"{ "command": "close-judgement" }"#,
        ])
        .unwrap();
        assert_eq!(result.messages, vec![Message::Plain("judgement".into())]);
        let tab = &result.groups[0];
        assert_eq!(tab.messages, vec![Message::Plain("tab".into())]);
        let context = &tab.groups[0];
        assert_eq!(context.messages, vec![Message::Plain("context".into())]);
        let testcase = &context.groups[0];
        assert_eq!(testcase.messages, vec![Message::Plain("testcase".into())]);
        assert_eq!(testcase.tests[0].messages, vec![Message::Plain("test".into())]);
    }

    #[test]
    fn test_explicit_values_override_aggregation() {
        let result = construct(&[
            r#"{ "command": "start-judgement" }"#,
            r#"{ "command": "start-tab", "title": "Tab One" }"#,
            r#"{ "command": "start-context" }"#,
            r#"{ "command": "start-testcase", "description": "case 1" }"#,
            r#"{ "command": "start-test", "expected": "SOMETHING" }"#,
            r#"{ "command": "close-test", "generated": "SOMETHING", "status": { "enum": "correct" }, "accepted": false }"#,
            r#"{ "command": "close-testcase", "accepted": true }"#,
            r#"{ "command": "close-context", "accepted": false }"#,
            r#"{ "command": "close-tab", "badgeCount": 42 }"#,
            r#"{ "command": "close-judgement", "accepted": true }"#,
        ])
        .unwrap();
        // Every level keeps its explicit value; the root status derives
        // from the explicit accepted, not from the rejected context.
        assert!(result.accepted);
        assert_eq!(result.status, Status::Correct);
        assert_eq!(result.description.as_deref(), Some("Correct"));
        let tab = &result.groups[0];
        assert_eq!(tab.badge_count, Some(42));
        assert_eq!(tab.groups[0].accepted, Some(false));
        assert_eq!(tab.groups[0].groups[0].accepted, Some(true));
        assert_eq!(tab.groups[0].groups[0].tests[0].accepted, Some(false));
    }

    #[test]
    fn test_escalation_is_monotonic_with_sticky_description() {
        let result = construct(&[
            r#"{ "command": "start-judgement" }"#,
            r#"{ "command": "escalate-status", "status": { "enum": "wrong", "human": "Oops" } }"#,
            r#"{ "command": "escalate-status", "status": { "enum": "runtime error", "human": "Crashed" } }"#,
            r#"{ "command": "escalate-status", "status": { "enum": "wrong", "human": "Later" } }"#,
            r#"{ "command": "close-judgement" }"#,
        ])
        .unwrap();
        assert_eq!(result.status, Status::RuntimeError);
        assert_eq!(result.description.as_deref(), Some("Oops"));
    }

    #[test]
    fn test_close_judgement_status_wins_over_escalation() {
        let result = construct(&[
            r#"{ "command": "start-judgement" }"#,
            r#"{ "command": "escalate-status", "status": { "enum": "internal error", "human": "Broken" } }"#,
            r#"{ "command": "close-judgement", "status": { "enum": "wrong", "human": "Final say" } }"#,
        ])
        .unwrap();
        assert_eq!(result.status, Status::Wrong);
        assert_eq!(result.description.as_deref(), Some("Final say"));
    }

    #[test]
    fn test_timeout_force_closes_open_nodes() {
        let result = construct_with(
            &[
                r#"{ "command": "start-judgement" }"#,
                r#"{ "command": "start-tab", "title": "Feedback" }"#,
                r#"{ "command": "start-context" }"#,
                r#"{ "command": "start-testcase", "description": "slow case" }"#,
                r#"{ "command": "start-test", "expected": "X" }"#,
            ],
            Locale::En,
            true,
        )
        .unwrap();
        assert!(!result.accepted);
        assert_eq!(result.status, Status::TimeLimitExceeded);
        assert_eq!(result.description.as_deref(), Some("Time limit exceeded"));
        let testcase = &result.groups[0].groups[0].groups[0];
        assert_eq!(testcase.accepted, Some(false));
        assert_eq!(testcase.tests[0].accepted, Some(false));
        assert_eq!(testcase.tests[0].status, Some(Status::TimeLimitExceeded));
        assert_eq!(result.groups[0].badge_count, Some(1));
    }

    #[test]
    fn test_timeout_after_clean_close_keeps_the_result() {
        let result = construct_with(
            &[
                r#"{ "command": "start-judgement" }"#,
                r#"{ "command": "close-judgement" }"#,
            ],
            Locale::En,
            true,
        )
        .unwrap();
        assert_eq!(result.status, Status::Correct);
    }

    #[test]
    fn test_mismatched_close_is_a_protocol_error() {
        let mut constructor = ResultConstructor::new(Locale::En);
        constructor.feed(r#"{ "command": "start-judgement" }"#).unwrap();
        constructor.feed(r#"{ "command": "start-tab", "title": "T" }"#).unwrap();
        let err = constructor.feed(r#"{ "command": "close-context" }"#);
        assert!(matches!(err, Err(JudgeError::Protocol { .. })));
    }

    #[test]
    fn test_unclosed_judgement_without_timeout_fails() {
        let mut constructor = ResultConstructor::new(Locale::En);
        constructor.feed(r#"{ "command": "start-judgement" }"#).unwrap();
        assert!(constructor.result(false).is_err());
    }

    #[test]
    fn test_annotations_attach_to_the_judgement_root() {
        let result = construct(&[
            r#"{ "command": "start-judgement" }"#,
            r#"{ "command": "start-tab", "title": "T" }"#,
            r#"{ "command": "annotate-code", "row": 3, "column": 1, "text": "undefined name", "type": "error" }"#,
            r#"{ "command": "close-tab" }"#,
            r#"{ "command": "close-judgement" }"#,
        ])
        .unwrap();
        assert_eq!(result.annotations.len(), 1);
        assert_eq!(result.annotations[0].row, 3);
        assert_eq!(result.annotations[0].severity.as_deref(), Some("error"));
    }

    #[test]
    fn test_derived_description_follows_locale() {
        let result = construct_with(
            &[
                r#"{ "command": "start-judgement" }"#,
                r#"{ "command": "start-tab", "title": "T" }"#,
                r#"{ "command": "start-context" }"#,
                r#"{ "command": "start-testcase", "description": "c" }"#,
                r#"{ "command": "start-test", "expected": "1" }"#,
                r#"{ "command": "close-test", "generated": "2", "status": { "enum": "wrong" } }"#,
                r#"{ "command": "close-testcase" }"#,
                r#"{ "command": "close-context" }"#,
                r#"{ "command": "close-tab" }"#,
                r#"{ "command": "close-judgement" }"#,
            ],
            Locale::Nl,
            false,
        )
        .unwrap();
        assert_eq!(result.status, Status::Wrong);
        assert_eq!(result.description.as_deref(), Some("Fout"));
    }

    #[test]
    fn test_testcase_without_tests_is_vacuously_accepted() {
        let result = construct(&[
            r#"{ "command": "start-judgement" }"#,
            r#"{ "command": "start-tab", "title": "T" }"#,
            r#"{ "command": "start-context" }"#,
            r#"{ "command": "start-testcase", "description": "setup only" }"#,
            r#"{ "command": "close-testcase" }"#,
            r#"{ "command": "close-context" }"#,
            r#"{ "command": "close-tab" }"#,
            r#"{ "command": "close-judgement" }"#,
        ])
        .unwrap();
        assert!(result.accepted);
        assert_eq!(result.groups[0].groups[0].groups[0].accepted, Some(true));
    }
}
