mod article;
mod candle;
mod corporate_action;
mod fundamentals;
mod symbol;
mod timeframe;

pub use article::{ArticleMeta, FetchStatus, FetchedArticle, NewsRow, SymbolLink};
pub use candle::{Candle, LatestCandle, TopMover};
pub use corporate_action::CorporateAction;
pub use fundamentals::{normalize_period_date, FiPoint, Period, Statement};
pub use symbol::{status_to_active, Symbol};
pub use timeframe::Tf;
