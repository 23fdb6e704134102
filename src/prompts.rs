// Answer engine prompt templates.
// All prompts sent through the provider gateway are defined here.

/// Fallback context sentence used when retrieval returns nothing.
pub const GENERIC_CONTEXT: &str = "The applicant is an experienced professional with a strong \
track record, broad technical skills, and excellent qualifications for this position.";

pub const ANSWER_PROMPT: &str = r#"Answer the following job application question about the applicant.

QUESTION: {question}

APPLICANT INFORMATION:
{context}

ADDITIONAL FACTS:
Phone: {phone}
Desired salary: {salary}

RULES:
1. Answer with the value only — a short phrase or a single number.
2. For numeric questions reply with exactly one number and nothing else.
3. Do not explain, qualify, or apologise.
4. If the information is missing, give the most plausible answer favourable to the applicant."#;

pub const OPTION_PROMPT: &str = r#"Answer the following job application question about the applicant.

QUESTION: {question}

APPLICANT INFORMATION:
{context}

ALLOWED OPTIONS:
{options}

RULES:
1. You MUST choose EXACTLY ONE option, EXACTLY as written above.
2. Reply with the chosen option text alone — no numbering, no explanation.
3. Never invent an option that is not in the list."#;

pub const CLASSIFY_SYSTEM: &str = "\
You are a precise form-question classifier. \
You MUST respond with a single valid JSON object — no markdown fences, no explanations.";

pub const CLASSIFY_PROMPT: &str = r#"Classify the following job application question.

QUESTION: {question}

OUTPUT SCHEMA (return exactly this structure):
{
  "question_type": "language_proficiency" | "skill_level" | "years_experience" | "education" | "personal" | "salary" | "availability" | "notice_period" | "visa_status" | "general",
  "keywords": ["string"],
  "language": "ISO 639-1 code of the question, e.g. en or de",
  "expected_format": "text" | "number" | "selection" | "boolean",
  "confidence": 0.0
}

RULES:
1. keywords are the content-bearing words of the question, lowercased.
2. confidence is your certainty in question_type, between 0 and 1.
3. Return ONLY the JSON object — nothing else."#;

/// System message stored with each journaled conversation.
pub const RECORD_SYSTEM: &str =
    "Job application question answering for {company} — {title}.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_carry_placeholders() {
        assert!(ANSWER_PROMPT.contains("{question}"));
        assert!(ANSWER_PROMPT.contains("{context}"));
        assert!(OPTION_PROMPT.contains("{options}"));
        assert!(CLASSIFY_PROMPT.contains("{question}"));
        assert!(RECORD_SYSTEM.contains("{company}"));
    }

    #[test]
    fn test_option_prompt_demands_exact_choice() {
        assert!(OPTION_PROMPT.contains("EXACTLY ONE option"));
        assert!(OPTION_PROMPT.contains("EXACTLY as written"));
    }
}
