//! Stock quote tool backed by Alpha Vantage `GLOBAL_QUOTE`

use super::{Tool, ToolContext, ToolOutput, TOOL_TIMEOUT};
use crate::state_machine::state::StockPriceInput;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct StockPriceTool {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl StockPriceTool {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn quote_url(&self, symbol: &str) -> Result<reqwest::Url, String> {
        reqwest::Url::parse_with_params(
            &self.base_url,
            &[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ],
        )
        .map_err(|e| format!("Invalid quote URL: {e}"))
    }

    async fn fetch(&self, symbol: &str) -> Result<Value, String> {
        let url = self.quote_url(symbol)?;
        let response = self
            .client
            .get(url)
            .timeout(TOOL_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("Stock quote request failed: {e}"))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| format!("Stock quote response was not JSON: {e}"))
    }
}

#[async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &'static str {
        "get_stock_price"
    }

    fn description(&self) -> String {
        "Fetch latest stock price for a given symbol (e.g. 'AAPL', 'TSLA') using Alpha Vantage."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["symbol"],
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "Ticker symbol"
                }
            }
        })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> ToolOutput {
        let input: StockPriceInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::json(false, &json!({"error": e.to_string()})),
        };

        match self.fetch(input.symbol.trim()).await {
            Ok(quote) => ToolOutput::json(true, &quote),
            Err(message) => {
                tracing::warn!(symbol = %input.symbol, error = %message, "Stock quote failed");
                ToolOutput::json(false, &json!({"error": message}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::test_context;

    fn tool(base_url: &str) -> StockPriceTool {
        StockPriceTool::new(reqwest::Client::new(), base_url, "secret")
    }

    #[test]
    fn test_quote_url() {
        let url = tool("https://www.alphavantage.co/query")
            .quote_url("BRK.B")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.alphavantage.co/query?function=GLOBAL_QUOTE&symbol=BRK.B&apikey=secret"
        );
    }

    #[test]
    fn test_symbol_is_escaped() {
        let url = tool("https://example.com/q").quote_url("A&B").unwrap();
        assert!(url.as_str().contains("symbol=A%26B"));
    }

    #[tokio::test]
    async fn test_missing_symbol() {
        let output = tool("https://example.com/q")
            .run(json!({}), test_context("t1"))
            .await;
        assert!(!output.success);
        assert!(output.output.contains("symbol"));
    }

    #[tokio::test]
    async fn test_unreachable_provider_reports_error() {
        let output = tool("http://127.0.0.1:9/query")
            .run(json!({"symbol": "AAPL"}), test_context("t1"))
            .await;
        assert!(!output.success);
        let value: Value = serde_json::from_str(&output.output).unwrap();
        assert!(value["error"]
            .as_str()
            .unwrap()
            .starts_with("Stock quote request failed"));
    }
}
