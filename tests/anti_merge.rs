//! Invariant 4 of spec.md §8: characters with distinct given names never
//! merge in the registry, even when surnames match.

use castshift::data::{Character, CharacterRegistry, Gender};

#[test]
fn distinct_given_names_with_shared_surname_stay_distinct() {
    let mut registry = CharacterRegistry::new();
    registry.insert(Character::new("Harry Potter", Gender::Male));
    registry.insert(Character::new("Lily Potter", Gender::Female));
    registry.insert(Character::new("James Potter", Gender::Male));
    registry.freeze();

    assert_eq!(registry.len(), 3);
    assert!(registry.get("Harry Potter").is_some());
    assert!(registry.get("Lily Potter").is_some());
    assert!(registry.get("James Potter").is_some());
}

#[test]
fn title_stripped_given_name_still_distinguishes_characters() {
    let mut registry = CharacterRegistry::new();
    registry.insert(Character::new("Mr. Darcy", Gender::Male));
    registry.insert(Character::new("Miss Darcy", Gender::Female));
    registry.freeze();

    assert_eq!(registry.len(), 2);
}

#[test]
fn variant_lookup_finds_character_by_alias() {
    let mut registry = CharacterRegistry::new();
    let mut harry = Character::new("Harry Potter", Gender::Male);
    harry.variants.push("Harry".to_string());
    registry.insert(harry);
    registry.freeze();

    let found = registry.find_by_variant("Harry").unwrap();
    assert_eq!(found.canonical_name, "Harry Potter");
}
