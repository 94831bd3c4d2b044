//! Declarative extraction rules for appointment detail pages.
//!
//! Each [`Field`] has an ordered list of [`Source`]s; the first source that
//! yields non-empty text wins.

use scraper::{ElementRef, Html};

use super::html::{
    attr, document, element_text, elements, has_class, text_by_class, text_by_tag_name,
    texts_by_class, with_class, with_id,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    ServiceType,
    Status,
    CheckInTimestamp,
    CheckOutTimestamp,
    Duration,
    AssignedStaff,
    ClientName,
    ClientEmails,
    ClientPhone,
    ClientAddress,
    AccessInstructions,
    DropOffInstructions,
    SpecialNotes,
    PetName,
    PetPhotoUrl,
    PetBirthdate,
    PetBreed,
    PetBreedType,
    PetFoodAllergies,
    PetHealthMobility,
    PetMedications,
    PetVeterinarian,
    PetBehavioral,
    PetBiteHistory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// `.field-label` starting with one of these (lowercase) prefixes; the
    /// value is the next `.field-value`
    LabelPrefix(&'static [&'static str]),
    /// `.field-label` equal to one of these (lowercase) names
    LabelIs(&'static [&'static str]),
    /// Attribute of the first tag carrying `class`
    ClassAttr {
        class: &'static str,
        attr: &'static str,
    },
    /// Attribute of the tag with `id`
    IdAttr {
        id: &'static str,
        attr: &'static str,
    },
    /// Text of the first element carrying the class
    ClassText(&'static str),
    /// Texts of `inner`-class elements inside the first `outer`-class element
    NestedTexts {
        outer: &'static str,
        inner: &'static str,
    },
    /// Text of the first element with this tag name
    TagText(&'static str),
    /// `<title>` text before the site-name suffix
    TitleTag,
}

pub struct Rule {
    pub field: Field,
    pub sources: &'static [Source],
}

pub const RULES: &[Rule] = &[
    Rule {
        field: Field::ServiceType,
        sources: &[Source::TagText("h1"), Source::TitleTag],
    },
    Rule {
        field: Field::Status,
        sources: &[
            Source::ClassText("appt-change-status"),
            Source::ClassText("appointment-status"),
        ],
    },
    Rule {
        field: Field::CheckInTimestamp,
        sources: &[Source::IdAttr {
            id: "when-wrapper",
            attr: "data-start_scheduled",
        }],
    },
    Rule {
        field: Field::CheckOutTimestamp,
        sources: &[Source::IdAttr {
            id: "when-wrapper",
            attr: "data-end_scheduled",
        }],
    },
    Rule {
        field: Field::Duration,
        sources: &[Source::ClassText("scheduled-duration")],
    },
    Rule {
        field: Field::AssignedStaff,
        sources: &[
            Source::ClassText("assigned-staff"),
            Source::ClassText("event-staff"),
        ],
    },
    Rule {
        field: Field::ClientName,
        sources: &[
            Source::ClassText("event-client"),
            Source::ClassText("client-name"),
        ],
    },
    Rule {
        field: Field::ClientEmails,
        sources: &[
            Source::ClassAttr {
                class: "message-client",
                attr: "data-emails",
            },
            Source::ClassText("client-email"),
        ],
    },
    Rule {
        field: Field::ClientPhone,
        sources: &[
            Source::ClassAttr {
                class: "mobile-contact",
                attr: "data-value",
            },
            Source::ClassText("client-phone"),
        ],
    },
    Rule {
        field: Field::ClientAddress,
        sources: &[
            Source::ClassAttr {
                class: "client-address",
                attr: "data-address",
            },
            Source::ClassText("client-address"),
        ],
    },
    Rule {
        field: Field::AccessInstructions,
        sources: &[Source::LabelPrefix(&["access"])],
    },
    Rule {
        field: Field::DropOffInstructions,
        sources: &[Source::LabelPrefix(&["drop off", "drop-off"])],
    },
    Rule {
        field: Field::SpecialNotes,
        sources: &[
            Source::NestedTexts {
                outer: "notes-wrapper",
                inner: "note",
            },
            Source::LabelPrefix(&["special notes", "notes"]),
        ],
    },
    Rule {
        field: Field::PetName,
        sources: &[Source::ClassText("event-pet"), Source::ClassText("pet-name")],
    },
    Rule {
        field: Field::PetPhotoUrl,
        sources: &[
            Source::ClassAttr {
                class: "pet-photo",
                attr: "src",
            },
            Source::ClassAttr {
                class: "pet-avatar",
                attr: "src",
            },
        ],
    },
    Rule {
        field: Field::PetBirthdate,
        sources: &[Source::LabelPrefix(&["birthdate", "birthday"])],
    },
    Rule {
        field: Field::PetBreed,
        sources: &[Source::LabelIs(&["breed(s)", "breeds", "breed"])],
    },
    Rule {
        field: Field::PetBreedType,
        sources: &[Source::LabelPrefix(&["breed type", "breed size", "size"])],
    },
    Rule {
        field: Field::PetFoodAllergies,
        sources: &[Source::LabelPrefix(&["food allergies", "allergies", "food"])],
    },
    Rule {
        field: Field::PetHealthMobility,
        sources: &[Source::LabelPrefix(&["health and mobility", "health", "mobility"])],
    },
    Rule {
        field: Field::PetMedications,
        sources: &[Source::LabelPrefix(&["medication"])],
    },
    Rule {
        field: Field::PetVeterinarian,
        sources: &[Source::LabelPrefix(&["veterinarian", "vet"])],
    },
    Rule {
        field: Field::PetBehavioral,
        sources: &[Source::LabelPrefix(&["behavioral", "behavior", "temperament"])],
    },
    Rule {
        field: Field::PetBiteHistory,
        sources: &[Source::LabelPrefix(&["bite history", "bite"])],
    },
];

/// Applies [`RULES`] to one parsed page; label blocks are read once up front
pub struct Extractor {
    document: Html,
    labels: Vec<(String, String)>,
}

impl Extractor {
    pub fn new(html: &str) -> Self {
        let document = document(html);
        let labels = label_blocks(&document);
        Self { document, labels }
    }

    /// First non-empty value for `field`
    pub fn get(&self, field: Field) -> Option<String> {
        RULES
            .iter()
            .find(|rule| rule.field == field)
            .and_then(|rule| rule.sources.iter().find_map(|source| self.apply(*source)))
    }

    /// Text of every element carrying `class`, in page order
    pub fn texts(&self, class: &str) -> Vec<String> {
        texts_by_class(self.document.root_element(), class)
    }

    pub const fn document(&self) -> &Html {
        &self.document
    }

    fn apply(&self, source: Source) -> Option<String> {
        let root = self.document.root_element();
        match source {
            Source::LabelPrefix(prefixes) => self.label_value(|label| {
                prefixes.iter().any(|prefix| label.starts_with(prefix))
            }),
            Source::LabelIs(names) => {
                self.label_value(|label| names.iter().any(|name| label == *name))
            }
            Source::ClassAttr { class, attr: name } => {
                with_class(root, class).find_map(|element| attr(&element, name))
            }
            Source::IdAttr { id, attr: name } => attr(&with_id(root, id)?, name),
            Source::ClassText(class) => text_by_class(root, class),
            Source::NestedTexts { outer, inner } => {
                let wrapper = with_class(root, outer).next()?;
                let texts = texts_by_class(wrapper, inner);
                (!texts.is_empty()).then(|| texts.join(" "))
            }
            Source::TagText(name) => text_by_tag_name(root, name),
            Source::TitleTag => text_by_tag_name(root, "title").and_then(|title| {
                let name = title.split(" | ").next().unwrap_or_default().trim();
                (!name.is_empty()).then(|| name.to_string())
            }),
        }
    }

    fn label_value(&self, matches: impl Fn(&str) -> bool) -> Option<String> {
        self.labels
            .iter()
            .find(|(label, _)| matches(label))
            .map(|(_, value)| value.clone())
    }
}

/// `(lowercase label, value)` for every `.field-label` whose next labelled
/// element in document order is a `.field-value`; empty values are skipped
fn label_blocks(document: &Html) -> Vec<(String, String)> {
    let marked: Vec<ElementRef<'_>> = elements(document.root_element())
        .filter(|element| has_class(element, "field-label") || has_class(element, "field-value"))
        .collect();

    marked
        .windows(2)
        .filter(|pair| has_class(&pair[0], "field-label") && has_class(&pair[1], "field-value"))
        .filter_map(|pair| {
            let label = element_text(pair[0])?
                .trim_end_matches(':')
                .trim()
                .to_lowercase();
            Some((label, element_text(pair[1])?))
        })
        .collect()
}
