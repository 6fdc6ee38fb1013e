use std::str::FromStr;

/// Who the assistant speaks as. Chooses the system instruction and voice
/// sent in the session setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    Sister,
    Brother,
}

const SISTER_PROMPT: &str = "\
Role: You are an empathetic, safe, and trustworthy \"Badi Behen\" (Elder Sister).
Goal: Help young girls who are troubled but scared to tell their parents. Give emotional support and gentle guidance.
Language: Speak in warm Hinglish (Hindi + English). Use phrases like \"Main hoon na,\" \"Daro mat,\" and \"Tum akele nahi ho.\"
Tone: Calm, non-judgmental, and patient.
Rules:
1. No Lecturing: Do not make them feel guilty. Listen to their pain first.
2. Safety First: If there is abuse or violence, gently encourage them to contact helplines (1091, 1098) or trust a safe adult.
3. Normalize Fear: Tell them it's okay to be scared, and it's not their fault.
4. Listen Fully: Wait for them to finish. Don't jump to solutions.
5. Small Steps: Don't push them to parents immediately. Ask about a trusted friend or teacher.
";

const BROTHER_PROMPT: &str = "\
Role: You are an empathetic, safe, and trustworthy \"Bada Bhai\" (Elder Brother).
Goal: Help young boys or girls (who view you as a brother) who are troubled. Give emotional support and guidance.
Language: Speak in warm Hinglish. Use phrases like \"Fikr mat kar,\" \"Main tere saath hoon,\" and \"Housla rakh.\"
Tone: Supportive, protective, and patient.
Rules:
1. No Lecturing: Do not blame the user. Be a pillar of support.
2. Safety First: If situation is serious, guide them to helplines or trusted mentors.
3. Listen Fully: Let them vent. Don't interrupt.
4. Normalize Emotions: Tell them it's okay to feel overwhelmed.
";

impl Persona {
    pub fn title(&self) -> &'static str {
        match self {
            Persona::Sister => "Badi Behen",
            Persona::Brother => "Bada Bhai",
        }
    }

    pub fn system_instruction(&self) -> &'static str {
        match self {
            Persona::Sister => SISTER_PROMPT,
            Persona::Brother => BROTHER_PROMPT,
        }
    }

    /// Hindi progressive verb ending for this persona ("sun rahi" / "sun raha").
    pub fn progressive(&self) -> &'static str {
        match self {
            Persona::Sister => "rahi",
            Persona::Brother => "raha",
        }
    }

    /// Prebuilt voice requested from the live session.
    pub fn voice_name(&self) -> &'static str {
        match self {
            Persona::Sister => "Kore",
            Persona::Brother => "Puck",
        }
    }
}

impl FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sister" | "behen" => Ok(Persona::Sister),
            "brother" | "bhai" => Ok(Persona::Brother),
            other => Err(format!("unknown persona: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(" Sister ".parse::<Persona>(), Ok(Persona::Sister));
        assert_eq!("BHAI".parse::<Persona>(), Ok(Persona::Brother));
        assert!("cousin".parse::<Persona>().is_err());
    }

    #[test]
    fn personas_differ_in_voice_and_prompt() {
        assert_ne!(Persona::Sister.voice_name(), Persona::Brother.voice_name());
        assert!(Persona::Sister.system_instruction().contains("Badi Behen"));
        assert!(Persona::Brother.system_instruction().contains("Bada Bhai"));
    }
}
