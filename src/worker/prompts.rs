//! Prompt builders for each delegation a worker makes.

use crate::issue::Issue;
use crate::review::AuditCategory;
use std::path::PathBuf;

/// Issue-level context shared by every prompt for one issue.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub issue: &'a Issue,
    /// Prior SILO notes, verbatim
    pub silo: Option<&'a str>,
    /// File-coordination instructions, present when several workers run
    pub coordination: Option<&'a str>,
}

impl PromptContext<'_> {
    fn header(&self) -> String {
        let issue = self.issue;
        let mut out = format!(
            "## Issue\n- ID: {}\n- Title: {}\n- Type: {}\n",
            issue.id, issue.title, issue.issue_type
        );
        if let Some(p) = issue.priority {
            out.push_str(&format!("- Priority: {}\n", p));
        }
        if let Some(parent) = &issue.parent_id {
            out.push_str(&format!("- Epic: {}\n", parent));
        }
        if !issue.description.trim().is_empty() {
            out.push_str(&format!("\n### Description\n{}\n", issue.description.trim()));
        }
        out
    }

    fn trailer(&self) -> String {
        let mut out = String::new();
        if let Some(silo) = self.silo.filter(|s| !s.trim().is_empty()) {
            out.push_str("\n## Prior Progress (SILO)\n\n");
            out.push_str(silo.trim());
            out.push('\n');
        }
        if let Some(coord) = self.coordination {
            out.push('\n');
            out.push_str(coord.trim_end());
            out.push('\n');
        }
        out
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (no files recorded)".to_string();
    }
    items
        .iter()
        .map(|f| format!("- {}", f))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn implement_prompt(ctx: &PromptContext<'_>) -> String {
    format!(
        r#"You are implementing a single issue in this repository.

{header}
## Rules
1. Read the relevant existing code before changing anything
2. Keep the change focused on this issue
3. Add or update tests for new behavior
4. Do not commit; the orchestrator handles version control
5. Finish with a short summary of what you changed and anything left undone
{trailer}"#,
        header = ctx.header(),
        trailer = ctx.trailer()
    )
}

pub fn self_review_prompt(ctx: &PromptContext<'_>, files: &[String]) -> String {
    format!(
        r#"Review the changes you just made for this issue and fix any problems you find.

{header}
## Changed Files
{files}

## Checklist
- Security: input validation, injection, secrets, authorization
- Performance: unnecessary work in loops, blocking IO, large allocations
- Quality: error handling, naming, dead code, missing tests
- Accessibility: labels, keyboard support, semantic structure (UI changes only)

Fix issues directly in the code. Finish with a one-paragraph summary of what
you changed during review, or state that nothing needed changing.
{trailer}"#,
        header = ctx.header(),
        files = bullet_list(files),
        trailer = ctx.trailer()
    )
}

pub fn audit_prompt(
    ctx: &PromptContext<'_>,
    files: &[String],
    passes: &[(AuditCategory, PathBuf)],
) -> String {
    let pass_list = passes
        .iter()
        .map(|(cat, path)| {
            format!(
                "### {}\nFocus: {}\nWrite findings to `{}`",
                cat,
                cat.focus(),
                path.display()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"Run the following read-only audit passes over the changes for this issue.
Run the passes in parallel where you can (for example with sub-agents). Do not
modify source files in this step.

{header}
## Changed Files
{files}

## Audit Passes

{passes}

## Output Format

For each pass, write a JSON file at the given path:

```json
{{
  "category": "security",
  "findings": [
    {{
      "severity": "error|warning|info|note",
      "file": "path/to/file",
      "line": 42,
      "issue": "What is wrong",
      "suggestion": "How to fix it",
      "resolved": false
    }}
  ]
}}
```

Use an empty `findings` array when a pass finds nothing. Severity error means
the change must not ship; warning means it should be fixed before merging.
{trailer}"#,
        header = ctx.header(),
        files = bullet_list(files),
        passes = pass_list,
        trailer = ctx.trailer()
    )
}

pub fn audit_fix_prompt(
    ctx: &PromptContext<'_>,
    blocking: &str,
    report_paths: &[PathBuf],
    attempt: u32,
    max_attempts: u32,
) -> String {
    let paths = report_paths
        .iter()
        .map(|p| format!("- `{}`", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"The audit found blocking problems in your changes (fix attempt {attempt} of {max}).

{header}
## Blocking Findings
{blocking}

## Instructions
1. Fix each finding in the code
2. In the audit report files below, set `"resolved": true` on every finding you fixed
3. Leave a finding unresolved only if it is a false positive, and explain why in its `suggestion`

Report files:
{paths}
{trailer}"#,
        attempt = attempt,
        max = max_attempts,
        header = ctx.header(),
        blocking = blocking.trim_end(),
        paths = paths,
        trailer = ctx.trailer()
    )
}

pub fn fix_prompt(ctx: &PromptContext<'_>, error_report: &str, attempt: u32, max_attempts: u32) -> String {
    format!(
        r#"Verification failed after your changes (fix attempt {attempt} of {max}).

{header}
## Failures

{report}
## Instructions
Fix the root cause of each failure. Do not disable, skip, or delete tests to make
them pass. Finish with a short summary of the fix.
{trailer}"#,
        attempt = attempt,
        max = max_attempts,
        header = ctx.header(),
        report = error_report,
        trailer = ctx.trailer()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> Issue {
        let mut issue = Issue::new("bd-1", "Add rate limiter")
            .with_priority(1)
            .with_parent("bd-epic");
        issue.description = "Limit requests per client".into();
        issue
    }

    #[test]
    fn test_implement_prompt_includes_issue_silo_and_coordination() {
        let issue = issue();
        let ctx = PromptContext {
            issue: &issue,
            silo: Some("# SILO: earlier work"),
            coordination: Some("## File Coordination\nlock first"),
        };
        let prompt = implement_prompt(&ctx);
        assert!(prompt.contains("- ID: bd-1"));
        assert!(prompt.contains("- Epic: bd-epic"));
        assert!(prompt.contains("Limit requests per client"));
        assert!(prompt.contains("## Prior Progress (SILO)\n\n# SILO: earlier work"));
        assert!(prompt.contains("## File Coordination"));
    }

    #[test]
    fn test_optional_sections_omitted() {
        let issue = Issue::new("bd-2", "Tiny");
        let ctx = PromptContext {
            issue: &issue,
            silo: Some("   "),
            coordination: None,
        };
        let prompt = implement_prompt(&ctx);
        assert!(!prompt.contains("SILO"));
        assert!(!prompt.contains("Coordination"));
        assert!(!prompt.contains("Priority"));
    }

    #[test]
    fn test_self_review_lists_files_and_checklist() {
        let issue = issue();
        let ctx = PromptContext { issue: &issue, silo: None, coordination: None };
        let prompt = self_review_prompt(&ctx, &["src/limit.rs".into()]);
        assert!(prompt.contains("- src/limit.rs"));
        assert!(prompt.contains("- Accessibility:"));
    }

    #[test]
    fn test_audit_prompt_names_report_paths() {
        let issue = issue();
        let ctx = PromptContext { issue: &issue, silo: None, coordination: None };
        let prompt = audit_prompt(
            &ctx,
            &[],
            &[(AuditCategory::Security, PathBuf::from("/p/.foreman/audits/bd-1/security.json"))],
        );
        assert!(prompt.contains("### security"));
        assert!(prompt.contains("`/p/.foreman/audits/bd-1/security.json`"));
        assert!(prompt.contains(r#""resolved": false"#));
        assert!(prompt.contains("- (no files recorded)"));
    }

    #[test]
    fn test_fix_prompts_carry_attempt_counts() {
        let issue = issue();
        let ctx = PromptContext { issue: &issue, silo: None, coordination: None };
        let fix = fix_prompt(&ctx, "## tests failed\n", 2, 3);
        assert!(fix.contains("fix attempt 2 of 3"));
        assert!(fix.contains("## tests failed"));

        let audit_fix = audit_fix_prompt(&ctx, "- [security] bad\n", &[PathBuf::from("a.json")], 1, 2);
        assert!(audit_fix.contains("fix attempt 1 of 2"));
        assert!(audit_fix.contains("- [security] bad"));
        assert!(audit_fix.contains("- `a.json`"));
    }
}
