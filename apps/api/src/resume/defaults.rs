use serde_json::{json, Map, Value};

/// Section keys in the order the editor shows them, with their names in
/// English, Russian and Uzbek.
const SECTIONS: &[(&str, [&str; 3])] = &[
    ("summary", ["Summary", "Обо мне", "Mening haqimda"]),
    ("awards", ["Awards", "Награды", "Mukofotlar"]),
    ("certifications", ["Certifications", "Сертификаты", "Sertifikatlar"]),
    ("education", ["Education", "Образование", "Ta'lim"]),
    ("experience", ["Experience", "Опыт", "Ish tajribasi"]),
    ("volunteer", ["Volunteering", "Волонтерство", "Ko'ngillilik"]),
    ("interests", ["Interests", "Интересы", "Qiziqishlar"]),
    ("languages", ["Languages", "Языки", "Tillar"]),
    ("profiles", ["Profiles", "Профили", "Profillar"]),
    ("projects", ["Projects", "Проекты", "Loyihalar"]),
    ("publications", ["Publications", "Публикации", "Nashrlar"]),
    ("references", ["References", "Отзывы", "Tavsiyalar"]),
    ("skills", ["Skills", "Навыки", "Ko'nikmalar"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeVariant {
    En,
    Ru,
    Uz,
}

impl ResumeVariant {
    /// Unknown or missing locales fall back to Russian.
    pub fn from_locale(locale: Option<&str>) -> Self {
        match locale.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
            Some(l) if l.starts_with("en") => ResumeVariant::En,
            Some(l) if l.starts_with("uz") => ResumeVariant::Uz,
            _ => ResumeVariant::Ru,
        }
    }

    fn index(self) -> usize {
        match self {
            ResumeVariant::En => 0,
            ResumeVariant::Ru => 1,
            ResumeVariant::Uz => 2,
        }
    }
}

fn default_basics() -> Value {
    json!({
        "name": "",
        "headline": "",
        "email": "",
        "phone": "",
        "location": "",
        "url": { "label": "", "href": "" },
        "customFields": [],
        "picture": {
            "url": "",
            "size": 64,
            "aspectRatio": 1,
            "borderRadius": 0,
            "effects": { "hidden": false, "border": false, "grayscale": false }
        }
    })
}

fn default_sections(variant: ResumeVariant) -> Value {
    let mut sections = Map::new();
    for (id, names) in SECTIONS {
        let mut section = json!({
            "id": id,
            "name": names[variant.index()],
            "columns": 1,
            "separateLinks": true,
            "visible": true,
        });
        if *id == "summary" {
            section["content"] = json!("");
        } else {
            section["items"] = json!([]);
        }
        sections.insert(id.to_string(), section);
    }
    sections.insert("custom".into(), json!({}));
    Value::Object(sections)
}

fn default_metadata() -> Value {
    json!({
        "template": "rhyhorn",
        "layout": [[
            ["profiles", "summary", "experience", "education", "projects", "volunteer", "references"],
            ["skills", "interests", "certifications", "awards", "publications", "languages"]
        ]],
        "css": { "value": "", "visible": false },
        "page": {
            "margin": 18,
            "format": "a4",
            "options": { "breakLine": true, "pageNumbers": true }
        },
        "theme": { "background": "#ffffff", "text": "#000000", "primary": "#dc2626" },
        "typography": {
            "font": {
                "family": "IBM Plex Serif",
                "subset": "cyrillic",
                "variants": ["regular", "italic", "600"],
                "size": 14
            },
            "lineHeight": 1.5,
            "hideIcons": false,
            "underlineLinks": true
        },
        "notes": ""
    })
}

/// Empty resume data with section names in the requested language.
pub fn default_resume_data(variant: ResumeVariant) -> Value {
    json!({
        "basics": default_basics(),
        "sections": default_sections(variant),
        "metadata": default_metadata(),
    })
}

/// Lowercases the title and joins its alphanumeric runs with `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
