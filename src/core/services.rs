use crate::adapters::UnavailableService;
use crate::domain::model::{ResourceUsage, TokenUsage};
use crate::domain::ports::{
    ClassifyReply, ClassifyRequest, ComparisonService, ContradictionReply, MergeRequest,
    MergeService,
};
use crate::utils::error::Result;
use std::sync::{Arc, Mutex, PoisonError};

/// 每百萬 token 的美元價格
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub cheap_input_per_million: f64,
    pub cheap_output_per_million: f64,
    pub quality_input_per_million: f64,
    pub quality_output_per_million: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            cheap_input_per_million: 0.80,
            cheap_output_per_million: 4.00,
            quality_input_per_million: 3.00,
            quality_output_per_million: 15.00,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Tier {
    Cheap,
    Quality,
}

/// 包住兩個服務層級，記錄呼叫次數、token 與估計成本
pub struct MeteredServices {
    cheap: Arc<dyn ComparisonService>,
    quality: Arc<dyn MergeService>,
    pricing: Pricing,
    usage: Mutex<ResourceUsage>,
}

impl MeteredServices {
    pub fn new(
        cheap: Arc<dyn ComparisonService>,
        quality: Arc<dyn MergeService>,
        pricing: Pricing,
    ) -> Self {
        Self {
            cheap,
            quality,
            pricing,
            usage: Mutex::new(ResourceUsage::default()),
        }
    }

    /// 離線模式：每個呼叫都失敗
    pub fn unavailable() -> Self {
        Self::new(
            Arc::new(UnavailableService),
            Arc::new(UnavailableService),
            Pricing::default(),
        )
    }

    pub async fn similarity(&self, left: &str, right: &str) -> Result<f64> {
        let reply = self.cheap.similarity(left, right).await;
        self.record(Tier::Cheap, reply.as_ref().ok().map(|r| r.usage));
        Ok(reply?.score)
    }

    pub async fn contradiction(
        &self,
        left: &str,
        right: &str,
        rules: Option<&str>,
    ) -> Result<ContradictionReply> {
        let reply = self.cheap.contradiction(left, right, rules).await;
        self.record(Tier::Cheap, reply.as_ref().ok().map(|r| r.usage));
        reply
    }

    pub async fn classify(&self, request: ClassifyRequest<'_>) -> Result<ClassifyReply> {
        let reply = self.cheap.classify(request).await;
        self.record(Tier::Cheap, reply.as_ref().ok().map(|r| r.usage));
        reply
    }

    pub async fn merge(&self, request: MergeRequest<'_>) -> Result<String> {
        let reply = self.quality.merge(request).await;
        self.record(Tier::Quality, reply.as_ref().ok().map(|r| r.usage));
        Ok(reply?.merged)
    }

    /// 取出目前累計並歸零
    pub fn take_usage(&self) -> ResourceUsage {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *usage)
    }

    pub fn snapshot(&self) -> ResourceUsage {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, tier: Tier, tokens: Option<TokenUsage>) {
        let tokens = tokens.unwrap_or_default();
        let (input_rate, output_rate) = match tier {
            Tier::Cheap => (
                self.pricing.cheap_input_per_million,
                self.pricing.cheap_output_per_million,
            ),
            Tier::Quality => (
                self.pricing.quality_input_per_million,
                self.pricing.quality_output_per_million,
            ),
        };
        let cost = (tokens.input_tokens as f64 * input_rate
            + tokens.output_tokens as f64 * output_rate)
            / 1_000_000.0;

        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        match tier {
            Tier::Cheap => usage.cheap_calls += 1,
            Tier::Quality => usage.quality_calls += 1,
        }
        usage.input_tokens += tokens.input_tokens;
        usage.output_tokens += tokens.output_tokens;
        usage.estimated_cost_usd += cost;
    }
}
