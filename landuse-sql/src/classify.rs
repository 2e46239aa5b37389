//! Classification par liste de décision (première règle vérifiée)
//!
//! Une liste ordonnée de couples (condition, label) est traduite en une seule
//! expression `CASE`. L'ordre définit la priorité: réordonner les règles
//! change le résultat. Aucune vérification d'exclusivité mutuelle.

use serde::{Deserialize, Serialize};

use crate::code::LandUseCode;
use crate::ident::{Condition, Ident, TableRef};

/// Label attribué quand aucune règle ne s'applique
pub const DEFAULT_FALLBACK: &str = "6_6_A";

/// Une règle de classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Condition, LandUseCode)", into = "(Condition, LandUseCode)")]
pub struct Rule {
    pub condition: Condition,
    pub label: LandUseCode,
}

impl From<(Condition, LandUseCode)> for Rule {
    fn from((condition, label): (Condition, LandUseCode)) -> Self {
        Self { condition, label }
    }
}

impl From<Rule> for (Condition, LandUseCode) {
    fn from(rule: Rule) -> Self {
        (rule.condition, rule.label)
    }
}

/// Liste de décision ordonnée avec label de repli
#[derive(Debug, Clone)]
pub struct DecisionList {
    rules: Vec<Rule>,
    fallback: LandUseCode,
}

impl DecisionList {
    pub fn new(rules: Vec<Rule>, fallback: LandUseCode) -> Self {
        Self { rules, fallback }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn fallback(&self) -> &LandUseCode {
        &self.fallback
    }

    /// Numéro de règle du repli (`len(rules) + 1`)
    pub fn fallback_index(&self) -> usize {
        self.rules.len() + 1
    }

    /// Expression du label
    pub fn label_expr(&self) -> String {
        self.case_expr(|rule, _| rule.label.literal(), self.fallback.literal())
    }

    /// Expression du numéro de règle
    pub fn leaf_expr(&self) -> String {
        self.case_expr(|_, i| i.to_string(), self.fallback_index().to_string())
    }

    fn case_expr<F>(&self, then: F, otherwise: String) -> String
    where
        F: Fn(&Rule, usize) -> String,
    {
        // CASE sans WHEN n'est pas du SQL valide
        if self.rules.is_empty() {
            return otherwise;
        }
        // Condition parenthésée: elle ne peut pas déborder sur le WHEN suivant
        let mut sql = String::from("CASE");
        for (i, rule) in self.rules.iter().enumerate() {
            sql.push_str(&format!(" WHEN ({}) THEN {}", rule.condition, then(rule, i + 1)));
        }
        sql.push_str(&format!(" ELSE {} END", otherwise));
        sql
    }
}

/// Table résultat de la classification
#[derive(Debug, Clone)]
pub struct ClassificationTarget {
    /// Table à créer
    pub result: TableRef,
    /// Table de statistiques source (table finale jointe)
    pub stats: TableRef,
    /// Colonne du label (`walousmaj`)
    pub label_column: Ident,
    /// Colonne du numéro de règle (`rulebased_leaf`)
    pub leaf_column: Ident,
    /// Utilisateurs recevant tous les privilèges sur la nouvelle table
    pub grant: Vec<Ident>,
}

/// Requêtes de classification, dans l'ordre d'exécution
pub fn classification_statements(target: &ClassificationTarget, list: &DecisionList) -> Vec<String> {
    let result = &target.result;
    let mut statements = vec![
        format!("DROP TABLE IF EXISTS {}", result),
        format!("CREATE TABLE {} AS (SELECT * FROM {})", result, target.stats),
        format!(
            "ALTER TABLE {} ADD COLUMN {} varchar, ADD COLUMN {} integer",
            result, target.label_column, target.leaf_column
        ),
    ];
    for user in &target.grant {
        statements.push(format!("GRANT ALL PRIVILEGES ON {} TO {}", result, user));
    }
    statements.push(format!(
        "UPDATE {} SET {} = ({}), {} = ({})",
        result,
        target.label_column,
        list.label_expr(),
        target.leaf_column,
        list.leaf_expr()
    ));
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(cond: &str, label: &str) -> Rule {
        Rule {
            condition: Condition::new(cond).unwrap(),
            label: LandUseCode::new(label).unwrap(),
        }
    }

    fn fallback() -> LandUseCode {
        LandUseCode::new(DEFAULT_FALLBACK).unwrap()
    }

    fn target() -> ClassificationTarget {
        ClassificationTarget {
            result: "results.classif".parse().unwrap(),
            stats: "results.capa_statistics".parse().unwrap(),
            label_column: Ident::new("walousmaj").unwrap(),
            leaf_column: Ident::new("rulebased_leaf").unwrap(),
            grant: vec![Ident::new("tais").unwrap()],
        }
    }

    #[test]
    fn test_label_expr_order() {
        let list = DecisionList::new(
            vec![
                rule("recypark_count is NOT NULL", "'4_3_3'"),
                rule("aeroport_coverage > 0.5", "'4_1_3'"),
            ],
            fallback(),
        );
        assert_eq!(
            list.label_expr(),
            "CASE WHEN (recypark_count is NOT NULL) THEN '4_3_3' \
             WHEN (aeroport_coverage > 0.5) THEN '4_1_3' ELSE '6_6_A' END"
        );
        assert_eq!(
            list.leaf_expr(),
            "CASE WHEN (recypark_count is NOT NULL) THEN 1 \
             WHEN (aeroport_coverage > 0.5) THEN 2 ELSE 3 END"
        );
    }

    #[test]
    fn test_empty_rules_fallback() {
        let list = DecisionList::new(vec![], fallback());
        assert_eq!(list.label_expr(), "'6_6_A'");
        assert_eq!(list.leaf_expr(), "1");
        assert_eq!(list.fallback_index(), 1);
    }

    #[test]
    fn test_condition_cannot_rewrite_case() {
        // Une condition qui tente de clore son WHEN reste un seul prédicat
        let list = DecisionList::new(
            vec![rule("x THEN '9' WHEN true", "'2_1'"), rule("area > 2500", "'3_1'")],
            fallback(),
        );
        assert_eq!(
            list.label_expr(),
            "CASE WHEN (x THEN '9' WHEN true) THEN '2_1' \
             WHEN (area > 2500) THEN '3_1' ELSE '6_6_A' END"
        );
        assert_eq!(list.label_expr().matches(" WHEN (").count(), 2);
    }

    #[test]
    fn test_classification_statements() {
        let list = DecisionList::new(vec![rule("area > 2500", "'2_1'")], fallback());
        let sql = classification_statements(&target(), &list);
        assert_eq!(sql[0], "DROP TABLE IF EXISTS results.classif");
        assert_eq!(
            sql[1],
            "CREATE TABLE results.classif AS (SELECT * FROM results.capa_statistics)"
        );
        assert!(sql[2].contains("ADD COLUMN walousmaj varchar"));
        assert!(sql[2].contains("ADD COLUMN rulebased_leaf integer"));
        assert_eq!(sql[3], "GRANT ALL PRIVILEGES ON results.classif TO tais");
        assert_eq!(
            sql[4],
            "UPDATE results.classif SET walousmaj = (CASE WHEN (area > 2500) THEN '2_1' ELSE '6_6_A' END), \
             rulebased_leaf = (CASE WHEN (area > 2500) THEN 1 ELSE 2 END)"
        );
    }

    #[test]
    fn test_rule_deserialize_pair() {
        let rules: Vec<Rule> =
            serde_json::from_str(r#"[["area > 2500", "'2_1'"], ["true", "5_1"]]"#).unwrap();
        assert_eq!(rules[0].label.as_str(), "2_1");
        assert_eq!(rules[1].condition.as_str(), "true");
        assert!(serde_json::from_str::<Vec<Rule>>(r#"[["x; y", "5_1"]]"#).is_err());
    }
}
