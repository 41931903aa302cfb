use {
    anyhow::Result,
    cardvault_cards::{
        types::CardBrand,
        validate::{clean_card_number, detect_brand, luhn_valid, mask},
    },
    serde::Serialize,
};

/// What `check-card` reports about a number. The number itself is never
/// echoed back unmasked.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CardCheck {
    pub luhn_valid: bool,
    pub brand: CardBrand,
    pub masked: String,
    pub digits: usize,
}

pub fn check_number(raw: &str) -> CardCheck {
    let number = clean_card_number(raw);
    CardCheck {
        luhn_valid: luhn_valid(&number),
        brand: detect_brand(&number),
        masked: mask(&number),
        digits: number.chars().count(),
    }
}

pub fn handle_check_card(number: &str, json: bool) -> Result<()> {
    let check = check_number(number);
    if json {
        println!("{}", serde_json::to_string_pretty(&check)?);
        return Ok(());
    }
    println!("Number: {}", check.masked);
    println!("Brand:  {}", check.brand);
    println!(
        "Luhn:   {}",
        if check.luhn_valid {
            "valid"
        } else {
            "invalid"
        }
    );
    if !check.luhn_valid {
        std::process::exit(1);
    }
    Ok(())
}
