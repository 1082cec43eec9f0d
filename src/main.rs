use serde::{Deserialize, Serialize};
use sip_pricing::bootstrap::{build_orchestrator, load_snapshot};
use sip_pricing::config::Config;
use sip_pricing::db::ProfitRateLimit;
use sip_pricing::domain::{
    CbSipPriceQuery, CbscPriceQuery, GetHidePriceForCbscRequest, GlobalDiscountQuery,
    LocalSipHiddenPriceQuery, LocalSipPriceQuery, LocalSipShippingFeeQuery, QueryResult,
    QueryResultView,
};
use sip_pricing::error::PricingError;
use sip_pricing::orchestration::{BatchOrchestrator, CancelToken};
use sip_pricing::resolver::SetPriceFactorEntry;
use sip_pricing::telemetry::init_tracing;
use tokio::io::AsyncReadExt;

/// One batch read from stdin.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "queries")]
enum BatchRequest {
    LocalSipHiddenPrices(Vec<LocalSipHiddenPriceQuery>),
    LocalSipShippingFees(Vec<LocalSipShippingFeeQuery>),
    LocalSipPrices(Vec<LocalSipPriceQuery>),
    CbSipPrices(Vec<CbSipPriceQuery>),
    CbscHiddenPrices(Vec<GetHidePriceForCbscRequest>),
    CbscPrices(Vec<CbscPriceQuery>),
    GlobalDiscounts(Vec<GlobalDiscountQuery>),
    SetPriceFactors(Vec<SetPriceFactorEntry>),
    UpdateProfitRateLimit(ProfitRateLimit),
}

fn views<T: Serialize + Clone>(results: Vec<QueryResult<T>>) -> serde_json::Value {
    let views: Vec<QueryResultView<T>> = results.iter().map(QueryResultView::from).collect();
    serde_json::to_value(views).unwrap_or(serde_json::Value::Null)
}

async fn run(
    orchestrator: &BatchOrchestrator,
    request: BatchRequest,
) -> Result<serde_json::Value, PricingError> {
    let ctx = CancelToken::new();
    let out = match request {
        BatchRequest::LocalSipHiddenPrices(q) => {
            views(orchestrator.get_local_sip_hidden_prices(&q).await?)
        }
        BatchRequest::LocalSipShippingFees(q) => {
            views(orchestrator.get_local_sip_shipping_fees(&q).await?)
        }
        BatchRequest::LocalSipPrices(q) => {
            views(orchestrator.calculate_local_sip_prices(&ctx, &q).await?)
        }
        BatchRequest::CbSipPrices(q) => views(orchestrator.calculate_cb_sip_prices(&ctx, &q).await?),
        BatchRequest::CbscHiddenPrices(q) => views(orchestrator.get_hide_prices_for_cbsc(&q).await?),
        BatchRequest::CbscPrices(q) => views(orchestrator.calculate_cbsc_prices(&ctx, &q).await?),
        BatchRequest::GlobalDiscounts(q) => {
            views(orchestrator.calculate_global_discounts(&ctx, &q).await?)
        }
        BatchRequest::SetPriceFactors(q) => views(orchestrator.set_cbsc_price_factors(&q).await?),
        BatchRequest::UpdateProfitRateLimit(limit) => {
            orchestrator.update_profit_rate_limit(&limit).await?;
            serde_json::Value::Null
        }
    };
    Ok(out)
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let snapshot = match load_snapshot(config.pricing_config_path.as_deref()).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load pricing config: {}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = match build_orchestrator(&config, snapshot).await {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let mut input = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut input).await {
        eprintln!("Failed to read stdin: {}", e);
        std::process::exit(1);
    }
    let request: BatchRequest = match serde_json::from_str(&input) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Invalid batch request: {}", e);
            std::process::exit(2);
        }
    };

    match run(&orchestrator, request).await {
        Ok(out) => println!("{}", out),
        Err(e) => {
            let detail = serde_json::to_string(&e.detail()).unwrap_or_else(|_| e.to_string());
            println!("{}", detail);
            std::process::exit(3);
        }
    }
}
