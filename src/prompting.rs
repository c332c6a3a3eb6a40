//! Numbered-sentence protocol prompt construction.
//!
//! Builds the system preamble, character context, and numbered sentence
//! list for a chunk transform request. Character context rendering is
//! deterministic for a given (registry, spec) pair — byte-identical across
//! runs — since it iterates characters in canonical-name sort order rather
//! than registry hash order.

use crate::data::{CharacterContext, CharacterRegistry, Chunk, Gender, TransformSpec};
use crate::providers::ChatMessage;

fn system_preamble(spec: &TransformSpec) -> String {
    match spec {
        TransformSpec::AllFemale => {
            "Rewrite the text so every character, regardless of original gender, is portrayed as \
             female. Replace male pronouns with female ones. Replace titles such as 'Mr.' with \
             'Ms.' or 'Mrs.' as appropriate. Feminize gendered nouns (actor -> actress, waiter -> \
             waitress). Re-gender character names per the mapping below. Preserve everything else \
             about the sentence exactly: punctuation, clause structure, and non-gendered content."
                .to_string()
        }
        TransformSpec::AllMale => {
            "Rewrite the text so every character, regardless of original gender, is portrayed as \
             male. Replace female pronouns with male ones. Replace titles such as 'Mrs.'/'Ms.' with \
             'Mr.'. Masculinize gendered nouns (actress -> actor, waitress -> waiter). Re-gender \
             character names per the mapping below. Preserve everything else about the sentence \
             exactly: punctuation, clause structure, and non-gendered content."
                .to_string()
        }
        TransformSpec::GenderSwap => {
            "Rewrite the text so each character's gender is individually flipped: originally male \
             characters become female and originally female characters become male; nonbinary \
             characters are left unchanged. Swap pronouns, titles, and gendered nouns accordingly. \
             Rewrite each character's name per the per-character mapping below rather than a global \
             rule. Preserve everything else about the sentence exactly."
                .to_string()
        }
        TransformSpec::Nonbinary => {
            "Rewrite the text so every character uses singular they/them/their pronouns, rewriting \
             subject-verb agreement accordingly (e.g. 'he was' -> 'they were'). Replace gendered \
             titles with 'Mx.'. Neutralize gendered nouns (actor/actress -> performer, waiter/ \
             waitress -> server). Preserve everything else about the sentence exactly."
                .to_string()
        }
        TransformSpec::Custom { .. } => {
            "Rewrite the text applying the per-character name and gender mapping below. Characters \
             with no mapping entry are left completely unchanged, including their pronouns, titles, \
             and name. Preserve everything else about the sentence exactly."
                .to_string()
        }
    }
}

/// Render the "Original -> Target" character context line for one character,
/// or `None` if this transform leaves the character unchanged.
fn render_character_line(character: &crate::data::Character, spec: &TransformSpec) -> Option<String> {
    let target_gender = spec.target_gender(character)?;
    let target_name = spec.target_name(character);
    let name_part = match target_name {
        Some(name) => format!("{} -> {}", character.canonical_name, name),
        None => character.canonical_name.clone(),
    };
    let (subject, object, possessive) = target_gender.pronoun_triple();
    Some(format!(
        "{name_part} ({:?} -> {:?}, pronouns: {subject}/{object}/{possessive})",
        character.gender, target_gender
    ))
}

/// Build the deterministic character context block for a chunk's prompt.
pub fn build_character_context(registry: &CharacterRegistry, spec: &TransformSpec) -> CharacterContext {
    let mut characters: Vec<_> = registry.iter().collect();
    characters.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));

    let lines: Vec<String> = characters
        .into_iter()
        .filter_map(|c| render_character_line(c, spec))
        .collect();

    CharacterContext {
        summary: if lines.is_empty() {
            "No character-specific mappings apply to this chunk.".to_string()
        } else {
            lines.join("\n")
        },
    }
}

fn numbered_sentence_list(chunk: &Chunk) -> String {
    chunk
        .sentences
        .iter()
        .map(|(index, sentence)| format!("{index}. {sentence}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the full chat message pair for a chunk transform request.
/// `stricter` requests the one-retry-with-stricter-reminder variant after an
/// alignment violation.
pub fn build_transform_messages(
    chunk: &Chunk,
    context: &CharacterContext,
    spec: &TransformSpec,
    stricter: bool,
) -> Vec<ChatMessage> {
    let mut system = format!(
        "{}\n\nCharacter mapping for this excerpt:\n{}",
        system_preamble(spec),
        context.summary
    );
    system.push_str(
        "\n\nReturn a JSON object mapping each input sentence number to its transformed sentence. \
         The set of keys must exactly match the input sentence numbers -- no more, no fewer -- and \
         every sentence must be rewritten, even ones with no gendered content (echo them unchanged).",
    );

    if stricter {
        system.push_str(
            "\n\nYour previous response did not include a transformed sentence for every input \
             number. This is a hard requirement: the response object must have exactly one entry \
             per input sentence number, with no omissions and no extra keys.",
        );
    }

    vec![
        ChatMessage::system(system),
        ChatMessage::user(numbered_sentence_list(chunk)),
    ]
}

/// Build the focused re-transform prompt for a quality-control retry,
/// scoping the request to only the sentences flagged with defects.
pub fn build_focused_retry_messages(
    chunk: &Chunk,
    context: &CharacterContext,
    spec: &TransformSpec,
    flagged_indices: &[usize],
) -> Vec<ChatMessage> {
    let flagged: Vec<(usize, String)> = chunk
        .sentences
        .iter()
        .filter(|(index, _)| flagged_indices.contains(index))
        .cloned()
        .collect();

    let mut system = format!(
        "{}\n\nCharacter mapping for this excerpt:\n{}",
        system_preamble(spec),
        context.summary
    );
    system.push_str(
        "\n\nThese sentences were previously transformed but still contain gendered language \
         inconsistent with the mapping above. Rewrite only these sentences, applying the mapping \
         strictly. Return a JSON object mapping each sentence number to its corrected text.",
    );

    let list = flagged
        .iter()
        .map(|(index, sentence)| format!("{index}. {sentence}"))
        .collect::<Vec<_>>()
        .join("\n");

    vec![ChatMessage::system(system), ChatMessage::user(list)]
}
