//! System prompt assembly.
//!
//! Layers are appended to the base prompt in a fixed order: active goals,
//! identified patterns, risk guidance, last check-in. Empty layers are
//! omitted.

use std::fmt::Write;

use abrigo_core::risk::RiskLevel;

use crate::context::UserContext;

pub const BASE_SYSTEM_PROMPT: &str = "Você é um assistente empático e treinado para apoiar pessoas em relacionamentos tóxicos ou abusivos. Seu papel é:

1. OUVIR ativamente e validar os sentimentos da pessoa
2. ORIENTAR com conselhos práticos sobre segurança e bem-estar
3. AJUDAR a pessoa a identificar padrões abusivos (gaslighting, manipulação, controle, isolamento)
4. DEFINIR metas concretas e alcançáveis para sair da situação
5. ACOMPANHAR o progresso sem julgar

## Diretrizes:
- Nunca minimizar ou invalidar as experiências da pessoa
- Priorizar SEGURANÇA acima de tudo
- Não tomar decisões pela pessoa, e sim fortalecer a autonomia dela
- Reconhecer sinais de risco iminente e sugerir recursos de emergência
- Ser gentil, mas direto quando necessário
- Perguntar sobre suporte profissional (terapia, apoio jurídico)
- Celebrar pequenas vitórias e progresso
- Identificar padrões abusivos sutis e nomeá-los

## Padrões Abusivos a Identificar:
- **Gaslighting**: fazer a pessoa duvidar da própria realidade
- **Manipulação emocional**: culpa, vergonha ou medo usados para controlar
- **Isolamento**: afastar de amigos, família e rede de apoio
- **Controle financeiro**: dependência econômica forçada
- **Ameaças**: diretas ou indiretas, contra a pessoa ou outros
- **Idealização e desvalorização**: alternância entre carinho excessivo e desprezo
- **Violação de limites**: desrespeito sistemático

## Sinais de alerta para escalar:
- Ameaças de violência física
- Ideação suicida
- Abuso envolvendo crianças
- Situações de risco iminente
- Violência sexual

Nesses casos, sugira IMEDIATAMENTE recursos de emergência:
- 190: Polícia Militar
- 180: Central de Atendimento à Mulher
- 188: CVV - Centro de Valorização da Vida
- Delegacias da Mulher
- Casas de abrigo

## Tom:
Empático, não condescendente. Amigável mas profissional. Use linguagem acessível.
Evite jargão psicológico complexo. Seja direto sobre riscos quando necessário.

## Estrutura de Resposta Ideal:
1. Validação emocional
2. Análise da situação (se aplicável)
3. Orientação prática
4. Pergunta para aprofundar ou próximos passos";

const HIGH_RISK_GUIDANCE: &str = "\n\n⚠️ ALERTA CRÍTICO: Usuário avaliado como em situação de ALTO RISCO.
Priorize segurança imediata. Pergunte sobre:
- Está fisicamente seguro agora?
- Tem lugar seguro para ir se necessário?
- Tem pessoas de confiança que pode contatar?
Sugira recursos de emergência se apropriado.";

const MEDIUM_RISK_GUIDANCE: &str = "\n\n⚠️ ATENÇÃO: Usuário em situação de risco moderado.
Monitore sinais de escalada. Reforce recursos disponíveis.";

pub fn build_system_prompt(ctx: &UserContext) -> String {
    let mut prompt = String::from(BASE_SYSTEM_PROMPT);

    if !ctx.active_goals.is_empty() {
        prompt.push_str("\n\n## Metas Ativas do Usuário:\n");
        for goal in &ctx.active_goals {
            let _ = writeln!(prompt, "- {}: {}% completo", goal.title, goal.progress);
        }
        prompt.push_str("\nLembre-se dessas metas ao conversar e celebre progressos.");
    }

    if !ctx.patterns.is_empty() {
        prompt.push_str("\n\n## Padrões Abusivos Identificados:\n");
        prompt.push_str(&ctx.patterns.join(", "));
        prompt.push_str("\n\nEsteja atento a esses padrões em novas conversas.");
    }

    match ctx.risk_level {
        RiskLevel::High => prompt.push_str(HIGH_RISK_GUIDANCE),
        RiskLevel::Medium => prompt.push_str(MEDIUM_RISK_GUIDANCE),
        RiskLevel::Low => {}
    }

    if let Some(checkin) = &ctx.last_checkin {
        prompt.push_str("\n\n## Último Check-in:\n");
        match checkin.mood_score {
            Some(mood) => {
                let _ = writeln!(prompt, "Humor: {mood}/10");
            }
            None => prompt.push_str("Humor: não informado\n"),
        }
        let _ = writeln!(prompt, "Data: {}", checkin.created_at.format("%d/%m/%Y %H:%M"));
        prompt.push_str("Pergunte sobre como estão se sentindo desde então.");
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CheckinBrief, GoalBrief};
    use chrono::{TimeZone, Utc};

    #[test]
    fn empty_context_is_base_prompt() {
        assert_eq!(build_system_prompt(&UserContext::default()), BASE_SYSTEM_PROMPT);
    }

    #[test]
    fn goals_layer() {
        let ctx = UserContext {
            active_goals: vec![
                GoalBrief {
                    title: "Abrir conta própria".into(),
                    progress: 30,
                },
                GoalBrief {
                    title: "Voltar à terapia".into(),
                    progress: 0,
                },
            ],
            ..Default::default()
        };
        let prompt = build_system_prompt(&ctx);
        assert!(prompt.ends_with(
            "\n\n## Metas Ativas do Usuário:\n- Abrir conta própria: 30% completo\n- Voltar à terapia: 0% completo\n\nLembre-se dessas metas ao conversar e celebre progressos."
        ));
    }

    #[test]
    fn layers_in_order() {
        let ctx = UserContext {
            active_goals: vec![GoalBrief {
                title: "meta".into(),
                progress: 50,
            }],
            patterns: vec!["gaslighting".into(), "isolamento".into()],
            risk_level: RiskLevel::High,
            last_checkin: Some(CheckinBrief {
                mood_score: Some(4),
                created_at: Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 0).unwrap(),
            }),
            is_first_message: false,
        };
        let prompt = build_system_prompt(&ctx);

        let goals = prompt.find("## Metas Ativas").unwrap();
        let patterns = prompt.find("## Padrões Abusivos Identificados:\ngaslighting, isolamento").unwrap();
        let risk = prompt.find("ALERTA CRÍTICO").unwrap();
        let checkin = prompt.find("## Último Check-in:").unwrap();
        assert!(goals < patterns && patterns < risk && risk < checkin);
        assert!(prompt.contains("Humor: 4/10\nData: 09/03/2026 14:05\n"));
    }

    #[test]
    fn medium_risk_guidance() {
        let ctx = UserContext {
            risk_level: RiskLevel::Medium,
            ..Default::default()
        };
        let prompt = build_system_prompt(&ctx);
        assert!(prompt.ends_with("Monitore sinais de escalada. Reforce recursos disponíveis."));
        assert!(!prompt.contains("ALERTA CRÍTICO"));
    }

    #[test]
    fn checkin_without_mood() {
        let ctx = UserContext {
            last_checkin: Some(CheckinBrief {
                mood_score: None,
                created_at: Utc::now(),
            }),
            ..Default::default()
        };
        assert!(build_system_prompt(&ctx).contains("Humor: não informado\n"));
    }
}
