use super::context::RootCauseContext;

pub const FIX_SYSTEM: &str = r#"You are a senior engineer repairing one defect reported by an automated tool (type checker, linter or test runner). Your change is applied without review and then checked by the project's regression suite, so it must be correct and complete on its own.

OUTPUT FORMAT:
APPROACH: <2-6 word lowercase label naming the kind of fix, e.g. "add null guard", "narrow union type">
```<language>
<the full replacement for the code shown between the BEGIN/END markers>
```

RULES:
- Output the WHOLE region between the markers, with your fix applied. Lines you return replace exactly those lines.
- Keep indentation, naming and formatting exactly as in the original.
- Do not add line numbers, markers or commentary inside the code block.
- Do not disable the check (no suppression comments, no `any`, no skipped tests).
- Only one code block."#;

pub const CONSERVATIVE_GUIDANCE: &str = r#"STRATEGY: conservative.
Make the smallest possible edit that removes the defect. Touch as few lines as you can and prefer local fixes over structural ones."#;

pub const CREATIVE_GUIDANCE: &str = r#"STRATEGY: creative.
Look past the reported line for the underlying cause. You may restructure the code shown if that is the cleaner fix, as long as behavior elsewhere is preserved."#;

pub const TYPE_CHECK_GUIDANCE: &str = r#"STRATEGY: specialized (type check).
Fix the types precisely: correct the annotation, add the missing conversion or narrow the value. Never widen types to silence the checker and never add casts that hide a real mismatch."#;

pub const STATIC_ANALYSIS_GUIDANCE: &str = r#"STRATEGY: specialized (static analysis).
Satisfy the named rule the way the rule's documentation recommends. Never add disable or ignore comments."#;

pub const TEST_FAILURE_GUIDANCE: &str = r#"STRATEGY: specialized (test failure).
Fix the code under test so the failing test passes. Change the test only when the assertion itself is clearly wrong."#;

/// System prompt for one strategy: shared rules plus its guidance.
pub fn system_prompt(guidance: &str) -> String {
    format!("{}\n\n{}", FIX_SYSTEM, guidance)
}

pub fn user_prompt(context: &RootCauseContext) -> String {
    let mut prompt = format!("DEFECT:\n{}\n", context.summary);

    if !context.references.is_empty() {
        prompt.push_str("\nIMPORTS IN THIS FILE:\n");
        for reference in &context.references {
            prompt.push_str(reference);
            prompt.push('\n');
        }
    }

    match (&context.file_path, &context.window) {
        (Some(path), Some(window)) => {
            let scope = if window.whole_file {
                "entire file".to_string()
            } else {
                format!("lines {}-{}", window.region.start, window.region.end)
            };
            prompt.push_str(&format!(
                "\nFILE: {} ({})\n<<<BEGIN>>>\n{}\n<<<END>>>\n",
                path.display(),
                scope,
                window.text
            ));
        }
        _ => {
            prompt.push_str(
                "\nThe source file could not be read. Propose the corrected code based on the message alone.\n",
            );
        }
    }

    prompt
}
