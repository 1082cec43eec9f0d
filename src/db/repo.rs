//! Repository layer for the pricing factor tables.

use crate::domain::numeric::{
    db_weight_to_gram, gram_to_db_weight, to_db_price, to_real_price,
};
use crate::domain::{MerchantId, Region, ShopId};
use crate::ratetable::{ConfigLevel, HiddenPriceConf};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

/// Which bracket table a fee config lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeTable {
    HiddenPrice,
    LocalShippingFee,
}

impl FeeTable {
    fn table_name(self) -> &'static str {
        match self {
            FeeTable::HiddenPrice => "hidden_price_configs",
            FeeTable::LocalShippingFee => "local_shipping_fee_configs",
        }
    }
}

/// Exchange rate from one region's currency into another's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRateRecord {
    pub from_region: Region,
    pub to_region: Region,
    /// Inflated by `PERCENT_PRECISION`.
    pub rate: i64,
    pub updated_at: i64,
}

/// Allowed profit-rate range for a merchant, inflated by
/// `PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProfitRateLimit {
    pub merchant_id: MerchantId,
    pub min_rate: i64,
    pub max_rate: i64,
}

impl ProfitRateLimit {
    pub fn contains(&self, rate: i64) -> bool {
        rate >= self.min_rate && rate <= self.max_rate
    }
}

/// Repository for the pricing factor database.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Hidden price bracket covering `weight` (fixed point) for a region
    /// pair: the row with the smallest `weight_range >= weight`.
    pub async fn get_hidden_price_config_record_by_weight(
        &self,
        primary: &Region,
        affiliate: &Region,
        weight: i64,
    ) -> Result<Option<HiddenPriceConf>, sqlx::Error> {
        self.fee_bracket(FeeTable::HiddenPrice, primary, affiliate, weight)
            .await
    }

    /// Local shipping fee bracket covering `weight` (fixed point).
    pub async fn get_local_shipping_fee_config_record_by_weight(
        &self,
        primary: &Region,
        affiliate: &Region,
        weight: i64,
    ) -> Result<Option<HiddenPriceConf>, sqlx::Error> {
        self.fee_bracket(FeeTable::LocalShippingFee, primary, affiliate, weight)
            .await
    }

    async fn fee_bracket(
        &self,
        table: FeeTable,
        primary: &Region,
        affiliate: &Region,
        weight: i64,
    ) -> Result<Option<HiddenPriceConf>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT weight_range, start_price, start_weight, round_size, price,
                   weight_step, adjustment
            FROM {}
            WHERE primary_region = ? AND affiliate_region = ? AND weight_range >= ?
            ORDER BY weight_range ASC
            LIMIT 1
            "#,
            table.table_name()
        );
        let row = sqlx::query(&sql)
            .bind(primary.as_str())
            .bind(affiliate.as_str())
            .bind(weight)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| fee_row_to_conf(&row, table, primary, affiliate)))
    }

    /// Insert or replace one bracket row.
    pub async fn upsert_fee_config(
        &self,
        table: FeeTable,
        primary: &Region,
        affiliate: &Region,
        conf: &HiddenPriceConf,
    ) -> Result<(), sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO {} (
                primary_region, affiliate_region, weight_range, start_price, start_weight,
                round_size, price, weight_step, adjustment, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(primary_region, affiliate_region, weight_range) DO UPDATE SET
                start_price = excluded.start_price,
                start_weight = excluded.start_weight,
                round_size = excluded.round_size,
                price = excluded.price,
                weight_step = excluded.weight_step,
                adjustment = excluded.adjustment,
                updated_at = excluded.updated_at
            "#,
            table.table_name()
        );
        sqlx::query(&sql)
            .bind(primary.as_str())
            .bind(affiliate.as_str())
            .bind(conf.weight_range)
            .bind(to_db_price(conf.start_price))
            .bind(gram_to_db_weight(conf.start_weight))
            .bind(conf.round_size)
            .bind(to_db_price(conf.price))
            .bind(gram_to_db_weight(conf.weight_step))
            .bind(to_db_price(conf.adjustment))
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_exchange_rate(
        &self,
        from_region: &Region,
        to_region: &Region,
    ) -> Result<Option<ExchangeRateRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT from_region, to_region, rate, updated_at
            FROM exchange_rates
            WHERE from_region = ? AND to_region = ?
            "#,
        )
        .bind(from_region.as_str())
        .bind(to_region.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ExchangeRateRecord {
            from_region: Region::new(row.get::<String, _>("from_region")),
            to_region: Region::new(row.get::<String, _>("to_region")),
            rate: row.get("rate"),
            updated_at: row.get("updated_at"),
        }))
    }

    pub async fn upsert_exchange_rate(
        &self,
        from_region: &Region,
        to_region: &Region,
        rate: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO exchange_rates (from_region, to_region, rate, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(from_region, to_region) DO UPDATE SET
                rate = excluded.rate,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(from_region.as_str())
        .bind(to_region.as_str())
        .bind(rate)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Profit rate for a (merchant, shop) pair, inflated by
    /// `PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU`.
    pub async fn get_profit_rate(
        &self,
        merchant_id: MerchantId,
        shop_id: ShopId,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT profit_rate FROM merchant_profit_rates WHERE merchant_id = ? AND shop_id = ?",
        )
        .bind(merchant_id as i64)
        .bind(shop_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("profit_rate")))
    }

    pub async fn upsert_profit_rate(
        &self,
        merchant_id: MerchantId,
        shop_id: ShopId,
        profit_rate: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO merchant_profit_rates (merchant_id, shop_id, profit_rate, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(merchant_id, shop_id) DO UPDATE SET
                profit_rate = excluded.profit_rate,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(merchant_id as i64)
        .bind(shop_id as i64)
        .bind(profit_rate)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_profit_rate_limit(
        &self,
        merchant_id: MerchantId,
    ) -> Result<Option<ProfitRateLimit>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT merchant_id, min_rate, max_rate FROM profit_rate_limits WHERE merchant_id = ?",
        )
        .bind(merchant_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ProfitRateLimit {
            merchant_id: r.get::<i64, _>("merchant_id") as MerchantId,
            min_rate: r.get("min_rate"),
            max_rate: r.get("max_rate"),
        }))
    }

    pub async fn update_profit_rate_limit(&self, limit: &ProfitRateLimit) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO profit_rate_limits (merchant_id, min_rate, max_rate, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(merchant_id) DO UPDATE SET
                min_rate = excluded.min_rate,
                max_rate = excluded.max_rate,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(limit.merchant_id as i64)
        .bind(limit.min_rate)
        .bind(limit.max_rate)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn fee_row_to_conf(
    row: &SqliteRow,
    table: FeeTable,
    primary: &Region,
    affiliate: &Region,
) -> HiddenPriceConf {
    HiddenPriceConf {
        weight_range: row.get("weight_range"),
        start_price: to_real_price(row.get("start_price")),
        start_weight: db_weight_to_gram(row.get("start_weight")),
        round_size: row.get("round_size"),
        price: to_real_price(row.get("price")),
        weight_step: db_weight_to_gram(row.get("weight_step")),
        adjustment: to_real_price(row.get("adjustment")),
        hpfn_key: format!("{}:{}:{}", table.table_name(), primary, affiliate),
        level: ConfigLevel::Table,
    }
}
