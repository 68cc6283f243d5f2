//! Centralized system instructions for each artifact type
//!
//! Every provider request carries the instruction for the node type being
//! generated. Keeping them here makes them easy to review and version.

use crate::store::NodeType;

/// Instruction for short content ideas.
pub const IDEA_PROMPT: &str = r#"You are a content strategist. Propose one distinct, specific content idea for the brief.
State the angle and the intended audience in two or three sentences. No preamble."#;

/// Instruction for headlines.
pub const TITLE_PROMPT: &str = r#"You are a headline editor. Write a single headline for the brief.
Be concrete, avoid clickbait, and keep it under twelve words. Return only the headline."#;

/// Instruction for synopses.
pub const SYNOPSIS_PROMPT: &str = r#"You are an editor. Write a synopsis of one paragraph (60-120 words) for the piece described.
Cover the premise, the key points and the takeaway."#;

/// Instruction for outlines.
pub const OUTLINE_PROMPT: &str = r#"You are an editor. Produce a sectioned outline for the piece described.
Use one line per section in the form "Heading: one-sentence summary". Five to eight sections."#;

/// Instruction for complete long-form pieces.
pub const FULL_CONTENT_PROMPT: &str = r#"You are a professional writer. Write the complete piece described in the brief.
Follow any style guides and instructions in the context block exactly. Use markdown headings for sections."#;

/// Instruction for social posts.
pub const SOCIAL_POST_PROMPT: &str = r#"You are a social media editor. Write one post for the brief.
Keep it under 280 characters, lead with the hook, and add at most three relevant hashtags."#;

/// Instruction for image prompts.
pub const IMAGE_PROMPT_PROMPT: &str = r#"You write prompts for image generation models. Describe one image for the brief:
subject, composition, lighting, style and palette, in a single paragraph. No text overlays."#;

/// Instruction for analysis of existing content.
pub const ANALYSIS_PROMPT: &str = r#"You are a critical editor. Analyse the content provided for clarity, structure, accuracy and tone.
List concrete strengths and weaknesses, then give three prioritised revisions."#;

/// System instruction for `node_type`.
pub fn system_prompt(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Idea => IDEA_PROMPT,
        NodeType::Title => TITLE_PROMPT,
        NodeType::Synopsis => SYNOPSIS_PROMPT,
        NodeType::Outline => OUTLINE_PROMPT,
        NodeType::FullContent => FULL_CONTENT_PROMPT,
        NodeType::SocialPost => SOCIAL_POST_PROMPT,
        NodeType::ImagePrompt => IMAGE_PROMPT_PROMPT,
        NodeType::Analysis => ANALYSIS_PROMPT,
    }
}
