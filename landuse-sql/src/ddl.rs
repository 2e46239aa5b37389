//! Administration: schémas, droits, index, clés série

use crate::ident::{quote_literal, Ident, TableRef};

/// Requête d'existence d'un schéma (une ligne si présent)
pub fn schema_exists_query(schema: &Ident) -> String {
    format!(
        "SELECT 1 FROM information_schema.schemata WHERE schema_name = {}",
        quote_literal(schema.as_str())
    )
}

/// Requête d'existence d'une table (une ligne si présente)
pub fn table_exists_query(table: &TableRef) -> String {
    format!(
        "SELECT 1 FROM information_schema.tables WHERE table_schema = {} AND table_name = {}",
        quote_literal(table.schema.as_str()),
        quote_literal(table.table.as_str())
    )
}

/// Création d'un schéma, précédée de sa suppression si `replace`
pub fn create_schema_statements(schema: &Ident, replace: bool) -> Vec<String> {
    let mut statements = Vec::with_capacity(2);
    if replace {
        statements.push(format!("DROP SCHEMA IF EXISTS {} CASCADE", schema));
    }
    statements.push(format!("CREATE SCHEMA {}", schema));
    statements
}

/// Droits complets d'un rôle sur un schéma, existants et futurs
pub fn grant_statements(schema: &Ident, user: &Ident) -> Vec<String> {
    let mut statements = vec![format!("GRANT USAGE ON SCHEMA {} TO {}", schema, user)];
    for kind in ["TABLES", "SEQUENCES", "FUNCTIONS"] {
        statements.push(format!(
            "GRANT ALL PRIVILEGES ON ALL {} IN SCHEMA {} TO {}",
            kind, schema, user
        ));
    }
    for kind in ["TABLES", "SEQUENCES", "FUNCTIONS"] {
        statements.push(format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT ALL PRIVILEGES ON {} TO {}",
            schema, kind, user
        ));
    }
    statements
}

/// Nom d'index `<table>_<colonne>_idx`
pub fn index_name(table: &TableRef, column: &Ident) -> crate::Result<Ident> {
    Ident::new(format!("{}_{}_idx", table.table, column))
}

/// Recréation d'un index (GiST pour une colonne géométrique)
pub fn create_index_statements(table: &TableRef, column: &Ident, gist: bool) -> crate::Result<Vec<String>> {
    let name = index_name(table, column)?;
    let using = if gist { " USING gist" } else { "" };
    Ok(vec![
        format!("DROP INDEX IF EXISTS {}.{}", table.schema, name),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}{} ({})",
            name, table, using, column
        ),
    ])
}

/// Ajout d'une colonne `SERIAL`, clé primaire ou non
pub fn add_serial_statement(table: &TableRef, column: &Ident, primary_key: bool) -> String {
    let pk = if primary_key { " PRIMARY KEY" } else { "" };
    format!("ALTER TABLE {} ADD COLUMN {} SERIAL{}", table, column, pk)
}

/// Extensions requises par le pipeline
pub const REQUIRED_EXTENSIONS: [&str; 2] = ["postgis", "tablefunc"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements() {
        let s = Ident::new("results").unwrap();
        assert_eq!(create_schema_statements(&s, false), vec!["CREATE SCHEMA results"]);
        assert_eq!(
            create_schema_statements(&s, true),
            vec!["DROP SCHEMA IF EXISTS results CASCADE", "CREATE SCHEMA results"]
        );
        assert_eq!(
            schema_exists_query(&s),
            "SELECT 1 FROM information_schema.schemata WHERE schema_name = 'results'"
        );
    }

    #[test]
    fn test_grant_statements() {
        let sql = grant_statements(&Ident::new("results").unwrap(), &Ident::new("tais").unwrap());
        assert_eq!(sql.len(), 7);
        assert_eq!(sql[0], "GRANT USAGE ON SCHEMA results TO tais");
        assert!(sql.contains(&"ALTER DEFAULT PRIVILEGES IN SCHEMA results GRANT ALL PRIVILEGES ON SEQUENCES TO tais".to_string()));
    }

    #[test]
    fn test_index_statements() {
        let table: TableRef = "agdp.capa".parse().unwrap();
        let sql = create_index_statements(&table, &Ident::new("geom").unwrap(), true).unwrap();
        assert_eq!(sql[0], "DROP INDEX IF EXISTS agdp.capa_geom_idx");
        assert_eq!(sql[1], "CREATE INDEX IF NOT EXISTS capa_geom_idx ON agdp.capa USING gist (geom)");

        let sql = create_index_statements(&table, &Ident::new("capakey").unwrap(), false).unwrap();
        assert_eq!(sql[1], "CREATE INDEX IF NOT EXISTS capa_capakey_idx ON agdp.capa (capakey)");
    }

    #[test]
    fn test_add_serial() {
        let table: TableRef = "agdp.capa".parse().unwrap();
        let id = Ident::new("gid").unwrap();
        assert_eq!(
            add_serial_statement(&table, &id, true),
            "ALTER TABLE agdp.capa ADD COLUMN gid SERIAL PRIMARY KEY"
        );
        assert_eq!(
            add_serial_statement(&table, &id, false),
            "ALTER TABLE agdp.capa ADD COLUMN gid SERIAL"
        );
    }
}
