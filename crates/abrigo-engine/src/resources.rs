//! National hotlines offered to users at risk.

use abrigo_core::risk::EmergencyResource;

const HOTLINES: &[(&str, &str, &str)] = &[
    ("Polícia Militar", "190", "Emergências policiais"),
    (
        "Central de Atendimento à Mulher",
        "180",
        "Atendimento especializado para mulheres em situação de violência",
    ),
    (
        "CVV - Centro de Valorização da Vida",
        "188",
        "Apoio emocional e prevenção ao suicídio",
    ),
    ("Disque Direitos Humanos", "100", "Denúncias de violações de direitos humanos"),
    ("SAMU", "192", "Atendimento médico de emergência"),
];

fn by_phone(phones: &[&str], with_description: bool) -> Vec<EmergencyResource> {
    phones
        .iter()
        .filter_map(|phone| HOTLINES.iter().find(|(_, p, _)| p == phone))
        .map(|(name, phone, description)| EmergencyResource {
            name: (*name).to_string(),
            phone: (*phone).to_string(),
            description: with_description.then(|| (*description).to_string()),
            available_24_7: true,
        })
        .collect()
}

/// Full directory, as served by `resources.emergency`.
pub fn directory() -> Vec<EmergencyResource> {
    by_phone(&["190", "180", "188", "100", "192"], true)
}

/// Attached to an immediate-danger assessment.
pub fn immediate_danger() -> Vec<EmergencyResource> {
    by_phone(&["190", "180", "188"], false)
}

/// Attached when the classifier escalates a moderate signal to high.
pub fn escalated() -> Vec<EmergencyResource> {
    by_phone(&["190", "180"], false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_lists_all_hotlines() {
        let phones: Vec<_> = directory().into_iter().map(|r| r.phone).collect();
        assert_eq!(phones, ["190", "180", "188", "100", "192"]);
        assert!(directory().iter().all(|r| r.available_24_7 && r.description.is_some()));
    }

    #[test]
    fn subsets() {
        let immediate: Vec<_> = immediate_danger().into_iter().map(|r| r.phone).collect();
        assert_eq!(immediate, ["190", "180", "188"]);
        let escalated: Vec<_> = escalated().into_iter().map(|r| r.phone).collect();
        assert_eq!(escalated, ["190", "180"]);
        assert!(immediate_danger()[2].name.starts_with("CVV"));
    }
}
