use anyhow::{Context, Result};
use sqlx::{migrate::Migrator, postgres::PgPool};

pub static MIGRATOR: Migrator = sqlx::migrate!("./src/db/migrations");

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await.context("failed to apply chat schema migrations")
}

#[cfg(test)]
mod tests {
    use super::MIGRATOR;

    #[test]
    fn migrations_are_embedded_in_order() {
        let versions: Vec<i64> = MIGRATOR.iter().map(|migration| migration.version).collect();

        assert!(!versions.is_empty());
        assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
